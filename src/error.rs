use std::io;

/// Errors surfaced by the daemon core.
///
/// Hardware failures are mapped onto this closed set before they reach the
/// remote interface; they never escape as panics.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation not available on this device or protocol generation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Argument outside its declared range or constraint.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The device reported BUSY for three consecutive attempts.
    #[error("device busy")]
    DeviceBusy,

    /// Transport cannot reach the device, or the wireless heartbeat was lost.
    #[error("device offline")]
    DeviceOffline(#[source] Option<io::Error>),

    /// No response within the transport timeout, after one retry.
    #[error("timed out waiting for device")]
    Timeout,

    /// CRC mismatch or malformed response framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A renderer failed to initialize or raised during draw.
    #[error("renderer failed: {0}")]
    RendererFailed(String),

    /// A renderer already occupies the requested z-index.
    #[error("z-index {0} already occupied")]
    Conflict(i32),

    /// A remote operation exceeded its deadline.
    #[error("operation deadline exceeded")]
    Deadline,
}

impl Error {
    pub fn unsupported(what: impl Into<String>) -> Self {
        Error::Unsupported(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        Error::InvalidArgument(what.into())
    }

    pub fn protocol(what: impl Into<String>) -> Self {
        Error::Protocol(what.into())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::DeviceOffline(Some(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
