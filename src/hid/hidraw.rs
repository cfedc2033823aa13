//! Feature-report access through /dev/hidrawN character devices.
//!
//! libc carries no wrappers for the hidraw feature ioctls, so the request
//! numbers are assembled here from the kernel's `_IOC` encoding: the low
//! byte is the command number under the hidraw magic `'H'`, bits 8..16 the
//! magic itself, bits 16..30 the buffer length, and the top two bits the
//! transfer direction (feature reports move data both ways, so both are
//! set).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Mutex;

use super::FeatureDevice;

const HIDRAW_MAGIC: libc::c_ulong = b'H' as libc::c_ulong;
const DIR_BOTH: libc::c_ulong = 3;

// command numbers under the hidraw magic
const NR_SET_FEATURE: libc::c_ulong = 0x06;
const NR_GET_FEATURE: libc::c_ulong = 0x07;

const fn feature_request(nr: libc::c_ulong, len: usize) -> libc::c_ulong {
    (DIR_BOTH << 30) | ((len as libc::c_ulong) << 16) | (HIDRAW_MAGIC << 8) | nr
}

/// A hidraw node opened for feature and numbered-report I/O.
///
/// The file handle is shared behind a mutex so the blocking-pool closures
/// issued by the transport can all reach it; exclusivity of whole commands
/// is the transport's job, this lock only keeps single syscalls sane.
pub struct HidrawDevice {
    file: Mutex<File>,
}

impl HidrawDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Run one feature ioctl against the node. The kernel reports the
    /// transferred byte count as a non-negative return value; anything
    /// negative means errno holds the failure.
    fn feature_ioctl(&self, request: libc::c_ulong, buf: *mut u8) -> io::Result<usize> {
        let file = self.file.lock().expect("hidraw lock poisoned");
        match unsafe { libc::ioctl(file.as_raw_fd(), request, buf) } {
            n if n >= 0 => Ok(n as usize),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

impl FeatureDevice for HidrawDevice {
    fn set_feature(&self, buf: &[u8]) -> io::Result<()> {
        // HIDIOCSFEATURE only reads the buffer; the cast satisfies ioctl's
        // untyped argument
        self.feature_ioctl(
            feature_request(NR_SET_FEATURE, buf.len()),
            buf.as_ptr() as *mut u8,
        )
        .map(|_| ())
    }

    fn get_feature(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.feature_ioctl(feature_request(NR_GET_FEATURE, buf.len()), buf.as_mut_ptr())
    }

    fn write_output(&self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock().expect("hidraw lock poisoned");
        file.write(buf)
    }

    fn read_input(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock().expect("hidraw lock poisoned");
        file.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_numbers_match_the_kernel_encoding() {
        // HIDIOCSFEATURE(90) / HIDIOCGFEATURE(90) as produced by the C macro
        assert_eq!(feature_request(NR_SET_FEATURE, 90), 0xC05A_4806);
        assert_eq!(feature_request(NR_GET_FEATURE, 90), 0xC05A_4807);
    }
}
