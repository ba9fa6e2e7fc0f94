use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::Error;

use super::{EntropyHandle, EntropySource, RawSample};

/// Hardware RNG character device such as /dev/hwrng.
pub struct DeviceSource {
    path: PathBuf,
    timeout: Duration,
}

impl DeviceSource {
    pub fn new(path: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            timeout,
        }
    }
}

impl EntropySource for DeviceSource {
    fn name(&self) -> &'static str {
        "hwrng"
    }

    fn open(&self) -> Result<Box<dyn EntropyHandle>, Error> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|e| {
                Error::DeviceUnavailable(format!("{} not available: {}", self.path.display(), e))
            })?;
        log::debug!("opened {}", self.path.display());
        Ok(Box::new(DeviceHandle {
            file,
            timeout: self.timeout,
        }))
    }
}

struct DeviceHandle {
    file: File,
    timeout: Duration,
}

impl DeviceHandle {
    /// Fills `buf` completely, polling for readability with a single deadline
    /// covering the whole read.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let fd = self.file.as_raw_fd();
        let deadline = Instant::now() + self.timeout;
        let mut filled = 0;

        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::DeviceReadFailure(format!(
                    "timeout after {}ms waiting for device",
                    self.timeout.as_millis()
                )));
            }

            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: pfd is a valid pollfd for the duration of the call.
            let ret = unsafe { libc::poll(&mut pfd, 1, poll_timeout_ms(remaining)) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::DeviceReadFailure(format!("poll failed: {}", err)));
            }
            if ret == 0 {
                continue;
            }

            match self.file.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::DeviceReadFailure("device returned end of file".into()));
                }
                Ok(n) => filled += n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::DeviceReadFailure(e.to_string())),
            }
        }

        Ok(())
    }
}

/// Rounds up so a sub-millisecond remainder still polls instead of
/// expiring early.
fn poll_timeout_ms(remaining: Duration) -> libc::c_int {
    remaining
        .as_micros()
        .div_ceil(1000)
        .min(libc::c_int::MAX as u128) as libc::c_int
}

impl EntropyHandle for DeviceHandle {
    fn label(&self) -> &'static str {
        "hwrng"
    }

    fn read_raw(&mut self) -> Result<Option<RawSample>, Error> {
        let mut buf = [0u8; 4];
        self.read_full(&mut buf)?;
        Ok(Some(RawSample(u32::from_le_bytes(buf))))
    }
}
