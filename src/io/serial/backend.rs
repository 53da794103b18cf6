//! Platform capability seam for the serial transport.
//!
//! [`Serial`](super::Serial) implements the timeout and locking semantics on top
//! of a [`SerialBackend`], which only knows how to open a device, apply framing,
//! move bytes without blocking and wait for readiness. The POSIX implementation is
//! [`TtyPort`](super::TtyPort).

use std::fmt::Debug;
use std::time::Duration;

use super::settings::SerialSettings;
use crate::error::Result;

/// State of the modem status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModemStatus {
    /// Clear To Send.
    pub cts: bool,
    /// Data Set Ready.
    pub dsr: bool,
    /// Ring Indicator.
    pub ri: bool,
    /// Carrier Detect.
    pub cd: bool,
}

/// Device operations needed by [`Serial`](super::Serial).
///
/// Methods taking `&self` may run concurrently from one reader and one writer;
/// methods taking `&mut self` run with all I/O excluded. Every I/O method fails
/// with [`SoniaError::PortNotOpened`](crate::error::SoniaError::PortNotOpened) on a
/// closed backend.
pub trait SerialBackend: Send + Sync + Debug {
    /// Open `path` and apply `settings`. On failure the backend stays closed.
    fn open(&mut self, path: &str, settings: &SerialSettings) -> Result<()>;

    /// Release the device. Closing a closed backend is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Whether a device is open.
    fn is_open(&self) -> bool;

    /// Apply `settings` to the open device, all or nothing.
    fn configure(&mut self, settings: &SerialSettings) -> Result<()>;

    /// Bytes waiting in the input buffer.
    fn available(&self) -> Result<usize>;

    /// Wait up to `timeout` for input. `Ok(false)` on timeout.
    fn wait_readable(&self, timeout: Duration) -> Result<bool>;

    /// Wait up to `timeout` until output can be accepted. `Ok(false)` on timeout.
    fn wait_writable(&self, timeout: Duration) -> Result<bool>;

    /// Read whatever is immediately available into `buf`; `Ok(0)` when nothing is.
    fn read_nonblocking(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write as much of `buf` as the device accepts now; `Ok(0)` when it accepts
    /// nothing.
    fn write_nonblocking(&self, buf: &[u8]) -> Result<usize>;

    /// Block until all queued output has been transmitted.
    fn drain(&self) -> Result<()>;

    /// Discard received but unread input.
    fn flush_input(&self) -> Result<()>;

    /// Discard written but untransmitted output.
    fn flush_output(&self) -> Result<()>;

    /// Transmit a break condition for `duration` (a platform default when zero).
    fn send_break(&self, duration: Duration) -> Result<()>;

    /// Assert or release the break condition.
    fn set_break(&self, level: bool) -> Result<()>;

    /// Drive the RTS line.
    fn set_rts(&self, level: bool) -> Result<()>;

    /// Drive the DTR line.
    fn set_dtr(&self, level: bool) -> Result<()>;

    /// Sample the modem status lines.
    fn modem_status(&self) -> Result<ModemStatus>;

    /// A handle on the open device that can wait for modem line changes on
    /// its own, without borrowing the backend.
    fn modem_watcher(&self) -> Result<Box<dyn ModemWatcher>>;
}

/// Waits for modem status changes on an independent handle to a device.
///
/// Obtained from [`SerialBackend::modem_watcher`]. The wait may outlive the
/// borrow of the backend, so it never blocks reconfiguration or I/O.
pub trait ModemWatcher: Send {
    /// Block until any of CTS, DSR, RI or CD changes.
    fn wait(&mut self) -> Result<()>;
}
