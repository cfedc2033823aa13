//! HID transport.
//!
//! [`FeatureDevice`] is the low-level report endpoint; [`Transport`] wraps
//! one with the concurrency and timing rules every device needs: an
//! exclusive scope around each logical operation, the per-profile
//! inter-command delay, and a bounded read timeout. The transport never
//! retries; retry policy lives in the device driver.

pub mod hidraw;

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};
use tokio::task;
use tokio::time::timeout;
use tracing::trace;

use crate::error::{Error, Result};

pub use hidraw::HidrawDevice;

/// Transport reads time out after this long and surface `Timeout`.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Raw report endpoint of one device node.
///
/// Production devices are hidraw nodes; tests substitute scripted fakes.
/// The Chroma command protocol rides on feature reports, the headset
/// memory protocol on numbered output/input reports. Callers address a
/// report by writing its id into the first buffer byte (the Chroma control
/// endpoint uses id zero, so its buffers simply start with 0x00).
pub trait FeatureDevice: Send + Sync + 'static {
    /// Push one feature report, id in the leading byte, to the device.
    fn set_feature(&self, buf: &[u8]) -> io::Result<()>;

    /// Fetch a feature report into `buf`; the leading byte selects which
    /// report to read. Yields the number of bytes the device filled in,
    /// which may be shorter than the buffer.
    fn get_feature(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Queue a numbered output report for the device.
    fn write_output(&self, buf: &[u8]) -> io::Result<usize>;

    /// Take the next numbered input report from the device.
    fn read_input(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Shared transport handle for one device node.
pub struct Transport {
    dev: Arc<dyn FeatureDevice>,
    delay: Duration,
    read_timeout: Duration,
    // Instant of the last completed operation, for delay enforcement.
    last_op: Mutex<Option<Instant>>,
}

impl Transport {
    pub fn new(dev: Arc<dyn FeatureDevice>, delay: Duration) -> Self {
        Transport {
            dev,
            delay,
            read_timeout: READ_TIMEOUT,
            last_op: Mutex::new(None),
        }
    }

    /// Acquire the device for one logical operation.
    ///
    /// The returned guard holds an exclusive lock: two concurrent commands
    /// can never interleave their reports on one device. Hold the guard for
    /// the whole request/response sequence including retries.
    pub async fn with_device(&self) -> TransportOp<'_> {
        TransportOp {
            transport: self,
            last_op: self.last_op.lock().await,
        }
    }
}

/// An exclusive transport session.
pub struct TransportOp<'a> {
    transport: &'a Transport,
    last_op: MutexGuard<'a, Option<Instant>>,
}

impl TransportOp<'_> {
    /// Sleep out the remainder of the inter-command delay, measured from the
    /// end of the previous operation on this device.
    async fn enforce_delay(&mut self) {
        if let Some(last) = *self.last_op {
            let elapsed = last.elapsed();
            if elapsed < self.transport.delay {
                tokio::time::sleep(self.transport.delay - elapsed).await;
            }
        }
    }

    /// Send one feature report.
    pub async fn send_feature(&mut self, report: &[u8]) -> Result<()> {
        self.enforce_delay().await;

        let dev = self.transport.dev.clone();
        let data = report.to_vec();
        let res = task::spawn_blocking(move || dev.set_feature(&data))
            .await
            .map_err(|e| Error::protocol(format!("transport task failed: {e}")))?;

        *self.last_op = Some(Instant::now());
        trace!(bytes = report.len(), "sent feature report");
        res.map_err(Error::from)
    }

    /// Read one feature report of `len` bytes.
    pub async fn read_feature(&mut self, len: usize) -> Result<Vec<u8>> {
        self.enforce_delay().await;

        let dev = self.transport.dev.clone();
        let read = task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            dev.get_feature(&mut buf).map(|n| {
                buf.truncate(n);
                buf
            })
        });

        let res = match timeout(self.transport.read_timeout, read).await {
            Ok(joined) => joined
                .map_err(|e| Error::protocol(format!("transport task failed: {e}")))?
                .map_err(Error::from),
            Err(_) => Err(Error::Timeout),
        };

        *self.last_op = Some(Instant::now());

        let buf = res?;
        if buf.len() < len {
            return Err(Error::protocol(format!(
                "short read: expected {len} bytes, got {}",
                buf.len()
            )));
        }
        trace!(bytes = buf.len(), "read feature report");
        Ok(buf)
    }

    /// Write one numbered output report (headset protocol).
    pub async fn write_output(&mut self, report: &[u8]) -> Result<()> {
        self.enforce_delay().await;

        let dev = self.transport.dev.clone();
        let data = report.to_vec();
        let res = task::spawn_blocking(move || dev.write_output(&data))
            .await
            .map_err(|e| Error::protocol(format!("transport task failed: {e}")))?;

        *self.last_op = Some(Instant::now());
        let written = res.map_err(Error::from)?;
        if written < report.len() {
            return Err(Error::protocol("short write".to_string()));
        }
        Ok(())
    }

    /// Read one numbered input report of `len` bytes (headset protocol).
    pub async fn read_input(&mut self, len: usize) -> Result<Vec<u8>> {
        self.enforce_delay().await;

        let dev = self.transport.dev.clone();
        let read = task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            dev.read_input(&mut buf).map(|n| {
                buf.truncate(n);
                buf
            })
        });

        let res = match timeout(self.transport.read_timeout, read).await {
            Ok(joined) => joined
                .map_err(|e| Error::protocol(format!("transport task failed: {e}")))?
                .map_err(Error::from),
            Err(_) => Err(Error::Timeout),
        };

        *self.last_op = Some(Instant::now());
        res
    }
}
