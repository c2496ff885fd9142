//! Byte sources for input reports
//!
//! Pairing and connection setup happen outside this crate. A [`Transport`]
//! only has to hand out one raw report per `read_report` call and be able to
//! re-acquire its device after a failure.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{debug, info};

/// Largest report a hidraw node hands out in one read.
const MAX_REPORT_LEN: usize = 64;

/// Source of raw input reports.
///
/// `read_report` may wait as long as the device stays silent; the session
/// races it against cancellation, so implementations need no timeout of
/// their own. Dropping a pending `read_report` future must not keep the
/// device busy.
pub trait Transport: Send + fmt::Debug {
    /// Acquires the underlying device.
    fn open(&mut self) -> BoxFuture<'_, io::Result<()>>;

    /// Waits for and returns the next report.
    fn read_report(&mut self) -> BoxFuture<'_, io::Result<Vec<u8>>>;

    /// Releases the underlying device.
    fn close(&mut self) -> BoxFuture<'_, io::Result<()>>;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

/// Linux hidraw node, e.g. `/dev/hidraw0`. Every read returns one report.
///
/// The node is opened non-blocking and polled through the tokio reactor, so
/// no read is ever parked on a blocking thread and `close` releases the file
/// descriptor at once.
#[derive(Debug)]
pub struct HidrawTransport {
    path: PathBuf,
    device: Option<AsyncFd<File>>,
}

impl HidrawTransport {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            device: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }
}

impl Transport for HidrawTransport {
    fn open(&mut self) -> BoxFuture<'_, io::Result<()>> {
        async move {
            let file = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.path)?;
            let device = AsyncFd::with_interest(file, Interest::READABLE)?;
            info!("Opened hidraw device {}", self.path.display());
            self.device = Some(device);
            Ok(())
        }
        .boxed()
    }

    fn read_report(&mut self) -> BoxFuture<'_, io::Result<Vec<u8>>> {
        async move {
            let device = self
                .device
                .as_ref()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "device not open"))?;
            let mut buf = [0u8; MAX_REPORT_LEN];
            loop {
                let mut guard = device.readable().await?;
                match guard.try_io(|inner| inner.get_ref().read(&mut buf)) {
                    Ok(Ok(0)) => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "device returned end of file",
                        ));
                    }
                    Ok(Ok(n)) => return Ok(buf[..n].to_vec()),
                    Ok(Err(e)) => return Err(e),
                    // Spurious wakeup, readiness already cleared
                    Err(_would_block) => continue,
                }
            }
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        async move {
            if self.device.take().is_some() {
                debug!("Closed hidraw device {}", self.path.display());
            }
            Ok(())
        }
        .boxed()
    }

    fn describe(&self) -> String {
        format!("hidraw:{}", self.path.display())
    }
}
