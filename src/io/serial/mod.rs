//! Blocking serial transport.
//!
//! [`Serial`] drives one terminal device with configurable framing and the dual
//! timeout policy of [`Timeout`]. One reader and one writer may proceed
//! concurrently; reconfiguration waits for both to finish.
//!
//! # Read semantics
//!
//! A read of N bytes returns in exactly one of these cases:
//!
//! 1. all N bytes were delivered;
//! 2. the inter-byte timeout elapsed after at least one byte arrived;
//! 3. the total timeout (`read_timeout_constant + read_timeout_multiplier * N`)
//!    elapsed;
//! 4. the device failed, in which case an error is returned.
//!
//! Timeouts are not errors: cases 2 and 3 report the partial count.
//!
//! # Example
//!
//! ```no_run
//! use sonia_common::io::serial::{Parity, Serial, Timeout};
//!
//! let port = Serial::builder("/dev/ttyUSB0")
//!     .baudrate(115_200)
//!     .parity(Parity::Even)
//!     .timeout(Timeout::simple(100))
//!     .open()?;
//!
//! port.write_str("PING\n")?;
//! let reply = port.read_line(64, "\n")?;
//! println!("{reply}");
//! # Ok::<(), sonia_common::error::SoniaError>(())
//! ```

use std::fmt;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::error::{Result, SoniaError};
use crate::sys::timer::Deadline;

pub mod backend;
pub mod ports;
pub mod settings;
pub mod timeout;
#[cfg(unix)]
pub mod unix;

pub use backend::{ModemStatus, ModemWatcher, SerialBackend};
pub use ports::{available_ports, PortInfo, PortKind};
pub use settings::{ByteSize, FlowControl, Parity, SerialSettings, StopBits};
pub use timeout::Timeout;
#[cfg(unix)]
pub use unix::TtyPort;

/// Default upper bound on a single line read.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 65536;

/// Default end-of-line marker.
pub const DEFAULT_EOL: &str = "\n";

#[cfg(unix)]
fn default_backend() -> Result<Box<dyn SerialBackend>> {
    Ok(Box::new(TtyPort::new()))
}

#[cfg(not(unix))]
fn default_backend() -> Result<Box<dyn SerialBackend>> {
    Err(SoniaError::invalid(
        "no serial backend is available for this platform",
    ))
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Serial`]. Created by [`Serial::builder`].
#[derive(Debug)]
pub struct SerialBuilder {
    port: String,
    settings: SerialSettings,
    timeout: Timeout,
    backend: Option<Box<dyn SerialBackend>>,
}

impl SerialBuilder {
    /// Line speed in bits per second.
    pub fn baudrate(mut self, baudrate: u32) -> Self {
        self.settings.baudrate = baudrate;
        self
    }

    /// Data bits per character.
    pub fn bytesize(mut self, bytesize: ByteSize) -> Self {
        self.settings.bytesize = bytesize;
        self
    }

    /// Parity mode.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Stop bits.
    pub fn stopbits(mut self, stopbits: StopBits) -> Self {
        self.settings.stopbits = stopbits;
        self
    }

    /// Flow control mode.
    pub fn flowcontrol(mut self, flowcontrol: FlowControl) -> Self {
        self.settings.flowcontrol = flowcontrol;
        self
    }

    /// Replace the whole framing at once.
    pub fn settings(mut self, settings: SerialSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Read and write timeouts.
    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a custom device backend instead of the platform one.
    pub fn backend(mut self, backend: Box<dyn SerialBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build a closed port.
    pub fn build(self) -> Result<Serial> {
        self.settings.validate()?;
        let backend = match self.backend {
            Some(backend) => backend,
            None => default_backend()?,
        };
        Ok(Serial {
            inner: RwLock::new(Inner {
                byte_time_ns: self.settings.byte_time_ns(),
                port: self.port,
                settings: self.settings,
                timeout: self.timeout,
                backend,
            }),
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        })
    }

    /// Build the port and open it when a device path was given.
    pub fn open(self) -> Result<Serial> {
        let open = !self.port.is_empty();
        let serial = self.build()?;
        if open {
            serial.open()?;
        }
        Ok(serial)
    }
}

// =============================================================================
// Transport state
// =============================================================================

#[derive(Debug)]
struct Inner {
    port: String,
    settings: SerialSettings,
    timeout: Timeout,
    byte_time_ns: u64,
    backend: Box<dyn SerialBackend>,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.backend.is_open() {
            Ok(())
        } else {
            Err(SoniaError::PortNotOpened)
        }
    }

    fn wait_byte_times(&self, count: usize, limit: Duration) {
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        let wait = Duration::from_nanos(self.byte_time_ns.saturating_mul(count)).min(limit);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }

    fn read_into(&self, buf: &mut [u8]) -> Result<usize> {
        let size = buf.len();
        if size == 0 {
            return Ok(0);
        }
        let deadline = Deadline::after_millis(self.timeout.total_read_ms(size));
        let inter_byte = self.timeout.inter_byte();

        let mut bytes_read = self.backend.read_nonblocking(buf)?;
        while bytes_read < size {
            let remaining = deadline.remaining();
            if remaining.is_zero() {
                trace!(port = %self.port, bytes_read, size, "read hit total timeout");
                break;
            }
            let wait = match inter_byte {
                Some(gap) if bytes_read > 0 => gap.min(remaining),
                _ => remaining,
            };
            if !self.backend.wait_readable(wait)? {
                trace!(port = %self.port, bytes_read, size, "read timed out");
                break;
            }

            if size > 1 && self.timeout.inter_byte_timeout == Timeout::MAX {
                let available = self.backend.available()?;
                let missing = size - bytes_read;
                if available < missing {
                    self.wait_byte_times(missing - available, deadline.remaining());
                }
            }

            let read_now = self.backend.read_nonblocking(&mut buf[bytes_read..])?;
            if read_now == 0 {
                return Err(SoniaError::io_other(
                    format!("reading from {}", self.port),
                    "device reports readiness to read but returned no data (device disconnected?)",
                ));
            }
            bytes_read += read_now;
        }
        Ok(bytes_read)
    }

    fn write_from(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let deadline = Deadline::after_millis(self.timeout.total_write_ms(data.len()));

        let mut written = 0;
        let mut first = true;
        while written < data.len() {
            let remaining = deadline.remaining();
            // The first attempt always runs, so a zero timeout can still write.
            if !first && remaining.is_zero() {
                trace!(port = %self.port, written, size = data.len(), "write hit total timeout");
                break;
            }
            first = false;
            if !self.backend.wait_writable(remaining)? {
                trace!(port = %self.port, written, size = data.len(), "write timed out");
                break;
            }
            let written_now = self.backend.write_nonblocking(&data[written..])?;
            if written_now == 0 {
                return Err(SoniaError::io_other(
                    format!("writing to {}", self.port),
                    "device reports readiness to write but accepted no data (device disconnected?)",
                ));
            }
            written += written_now;
        }
        Ok(written)
    }

    /// Append bytes to `out` until `eol`, `max_len` bytes, or a byte timeout.
    fn read_until(&self, out: &mut Vec<u8>, max_len: usize, eol: &[u8]) -> Result<usize> {
        let start = out.len();
        let mut byte = [0u8; 1];
        while out.len() - start < max_len {
            if self.read_into(&mut byte)? == 0 {
                break;
            }
            out.push(byte[0]);
            if out[start..].ends_with(eol) {
                break;
            }
        }
        Ok(out.len() - start)
    }

    fn reconfigure(&mut self, settings: SerialSettings) -> Result<()> {
        settings.validate()?;
        if self.backend.is_open() {
            self.backend.configure(&settings)?;
        }
        self.settings = settings;
        self.byte_time_ns = settings.byte_time_ns();
        debug!(port = %self.port, settings = %settings, "serial port reconfigured");
        Ok(())
    }
}

fn check_eol(eol: &str) -> Result<()> {
    if eol.is_empty() {
        return Err(SoniaError::invalid("end-of-line marker must not be empty"));
    }
    Ok(())
}

// =============================================================================
// Serial
// =============================================================================

/// A serial port.
///
/// All methods take `&self`; share a port between threads with `Arc<Serial>`.
/// Reads hold the read lock, writes hold the write lock, and reconfiguration
/// holds both.
pub struct Serial {
    inner: RwLock<Inner>,
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
}

impl Serial {
    /// Start building a port for the device at `port`.
    pub fn builder(port: impl Into<String>) -> SerialBuilder {
        SerialBuilder {
            port: port.into(),
            settings: SerialSettings::default(),
            timeout: Timeout::default(),
            backend: None,
        }
    }

    /// Open `port` at `baudrate` 8N1 without flow control.
    pub fn new(port: impl Into<String>, baudrate: u32, timeout: Timeout) -> Result<Self> {
        Self::builder(port).baudrate(baudrate).timeout(timeout).open()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open the configured device.
    ///
    /// # Errors
    ///
    /// [`SoniaError::InvalidArgument`] if no path is set, [`SoniaError::Logic`] if
    /// the port is already open, [`SoniaError::Io`] if the device cannot be opened
    /// or configured.
    pub fn open(&self) -> Result<()> {
        let _read = self.read_lock.lock();
        let _write = self.write_lock.lock();
        let mut inner = self.inner.write();
        Self::open_locked(&mut inner)
    }

    fn open_locked(inner: &mut Inner) -> Result<()> {
        if inner.port.is_empty() {
            return Err(SoniaError::invalid("empty port is invalid"));
        }
        if inner.backend.is_open() {
            return Err(SoniaError::logic(format!("{} is already open", inner.port)));
        }
        let Inner {
            port,
            settings,
            backend,
            ..
        } = inner;
        backend.open(port, settings)?;
        info!(port = %port, settings = %settings, "serial port opened");
        Ok(())
    }

    /// Close the device. Closing a closed port is a no-op.
    pub fn close(&self) -> Result<()> {
        let _read = self.read_lock.lock();
        let _write = self.write_lock.lock();
        let mut inner = self.inner.write();
        if inner.backend.is_open() {
            inner.backend.close()?;
            info!(port = %inner.port, "serial port closed");
        }
        Ok(())
    }

    /// Whether the device is open.
    pub fn is_open(&self) -> bool {
        self.inner.read().backend.is_open()
    }

    // -------------------------------------------------------------------------
    // Reading
    // -------------------------------------------------------------------------

    /// Bytes waiting in the input buffer.
    pub fn available(&self) -> Result<usize> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        inner.backend.available()
    }

    /// Block until input is available or `read_timeout_constant` elapses.
    /// Returns `false` on timeout.
    pub fn wait_readable(&self) -> Result<bool> {
        let _read = self.read_lock.lock();
        let inner = self.inner.read();
        inner.ensure_open()?;
        let budget = Duration::from_millis(u64::from(inner.timeout.read_timeout_constant));
        inner.backend.wait_readable(budget)
    }

    /// Sleep for the time it takes to transmit `count` characters.
    pub fn wait_byte_times(&self, count: usize) {
        let byte_time_ns = self.inner.read().byte_time_ns;
        let count = u64::try_from(count).unwrap_or(u64::MAX);
        thread::sleep(Duration::from_nanos(byte_time_ns.saturating_mul(count)));
    }

    /// Read up to `buf.len()` bytes. See the module docs for when it returns.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let _read = self.read_lock.lock();
        let inner = self.inner.read();
        inner.ensure_open()?;
        inner.read_into(buf)
    }

    /// Read up to `size` bytes and append them to `out`.
    pub fn read_to_vec(&self, out: &mut Vec<u8>, size: usize) -> Result<usize> {
        let start = out.len();
        out.resize(start + size, 0);
        let outcome = self.read(&mut out[start..]);
        let count = *outcome.as_ref().unwrap_or(&0);
        out.truncate(start + count);
        outcome
    }

    /// Read up to `size` bytes as text. Invalid UTF-8 is replaced.
    pub fn read_string(&self, size: usize) -> Result<String> {
        let mut buf = Vec::with_capacity(size);
        self.read_to_vec(&mut buf, size)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Append one line to `out`, including its `eol` marker.
    ///
    /// Stops at the first `eol`, after `max_len` bytes, or when a single-byte
    /// read times out; bytes read so far are kept in every case. Returns the
    /// number of bytes appended.
    pub fn read_until(&self, out: &mut Vec<u8>, max_len: usize, eol: &str) -> Result<usize> {
        check_eol(eol)?;
        let _read = self.read_lock.lock();
        let inner = self.inner.read();
        inner.ensure_open()?;
        inner.read_until(out, max_len, eol.as_bytes())
    }

    /// Read one line, including its `eol` marker when one arrived.
    pub fn read_line(&self, max_len: usize, eol: &str) -> Result<String> {
        let mut line = Vec::new();
        self.read_until(&mut line, max_len, eol)?;
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Read lines until `max_len` bytes in total or a byte timeout.
    ///
    /// Complete lines come first in arrival order; the last entry may be an
    /// incomplete line.
    pub fn read_lines(&self, max_len: usize, eol: &str) -> Result<Vec<String>> {
        check_eol(eol)?;
        let _read = self.read_lock.lock();
        let inner = self.inner.read();
        inner.ensure_open()?;

        let eol = eol.as_bytes();
        let mut lines = Vec::new();
        let mut total = 0;
        while total < max_len {
            let mut line = Vec::new();
            let count = inner.read_until(&mut line, max_len - total, eol)?;
            if count == 0 {
                break;
            }
            total += count;
            let complete = line.ends_with(eol);
            lines.push(String::from_utf8_lossy(&line).into_owned());
            if !complete {
                break;
            }
        }
        Ok(lines)
    }

    // -------------------------------------------------------------------------
    // Writing
    // -------------------------------------------------------------------------

    /// Write `data` within the total write timeout. Returns the count written.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let _write = self.write_lock.lock();
        let inner = self.inner.read();
        inner.ensure_open()?;
        inner.write_from(data)
    }

    /// Write a string. See [`Serial::write`].
    pub fn write_str(&self, data: &str) -> Result<usize> {
        self.write(data.as_bytes())
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Device path.
    pub fn port(&self) -> String {
        self.inner.read().port.clone()
    }

    /// Change the device path. An open port is closed and reopened on the new
    /// device.
    pub fn set_port(&self, port: impl Into<String>) -> Result<()> {
        let _read = self.read_lock.lock();
        let _write = self.write_lock.lock();
        let mut inner = self.inner.write();
        let was_open = inner.backend.is_open();
        if was_open {
            inner.backend.close()?;
        }
        inner.port = port.into();
        debug!(port = %inner.port, "serial port path changed");
        if was_open {
            Self::open_locked(&mut inner)?;
        }
        Ok(())
    }

    /// Current timeout policy.
    pub fn timeout(&self) -> Timeout {
        self.inner.read().timeout
    }

    /// Replace the timeout policy.
    pub fn set_timeout(&self, timeout: Timeout) {
        let _read = self.read_lock.lock();
        let _write = self.write_lock.lock();
        let mut inner = self.inner.write();
        inner.timeout = timeout;
        trace!(port = %inner.port, ?timeout, "timeout changed");
    }

    /// Current framing.
    pub fn settings(&self) -> SerialSettings {
        self.inner.read().settings
    }

    /// Replace the whole framing. On failure the previous framing stays in effect.
    pub fn set_settings(&self, settings: SerialSettings) -> Result<()> {
        self.update_settings(|current| *current = settings)
    }

    /// Current baud rate.
    pub fn baudrate(&self) -> u32 {
        self.settings().baudrate
    }

    /// Change the baud rate.
    pub fn set_baudrate(&self, baudrate: u32) -> Result<()> {
        self.update_settings(|s| s.baudrate = baudrate)
    }

    /// Current character size.
    pub fn bytesize(&self) -> ByteSize {
        self.settings().bytesize
    }

    /// Change the character size.
    pub fn set_bytesize(&self, bytesize: ByteSize) -> Result<()> {
        self.update_settings(|s| s.bytesize = bytesize)
    }

    /// Current parity mode.
    pub fn parity(&self) -> Parity {
        self.settings().parity
    }

    /// Change the parity mode.
    pub fn set_parity(&self, parity: Parity) -> Result<()> {
        self.update_settings(|s| s.parity = parity)
    }

    /// Current stop bits.
    pub fn stopbits(&self) -> StopBits {
        self.settings().stopbits
    }

    /// Change the stop bits.
    pub fn set_stopbits(&self, stopbits: StopBits) -> Result<()> {
        self.update_settings(|s| s.stopbits = stopbits)
    }

    /// Current flow control mode.
    pub fn flowcontrol(&self) -> FlowControl {
        self.settings().flowcontrol
    }

    /// Change the flow control mode.
    pub fn set_flowcontrol(&self, flowcontrol: FlowControl) -> Result<()> {
        self.update_settings(|s| s.flowcontrol = flowcontrol)
    }

    /// Transmission time of one character at the current framing.
    pub fn byte_time(&self) -> Duration {
        Duration::from_nanos(self.inner.read().byte_time_ns)
    }

    fn update_settings(&self, change: impl FnOnce(&mut SerialSettings)) -> Result<()> {
        let _read = self.read_lock.lock();
        let _write = self.write_lock.lock();
        let mut inner = self.inner.write();
        let mut settings = inner.settings;
        change(&mut settings);
        inner.reconfigure(settings)
    }

    // -------------------------------------------------------------------------
    // Buffers
    // -------------------------------------------------------------------------

    /// Block until all written data has been transmitted.
    pub fn flush(&self) -> Result<()> {
        let _read = self.read_lock.lock();
        let _write = self.write_lock.lock();
        let inner = self.inner.read();
        inner.ensure_open()?;
        inner.backend.drain()
    }

    /// Discard received but unread input.
    pub fn flush_input(&self) -> Result<()> {
        let _read = self.read_lock.lock();
        let inner = self.inner.read();
        inner.ensure_open()?;
        inner.backend.flush_input()
    }

    /// Discard written but untransmitted output.
    pub fn flush_output(&self) -> Result<()> {
        let _write = self.write_lock.lock();
        let inner = self.inner.read();
        inner.ensure_open()?;
        inner.backend.flush_output()
    }

    // -------------------------------------------------------------------------
    // Control lines
    // -------------------------------------------------------------------------

    fn with_backend<R>(&self, op: impl FnOnce(&dyn SerialBackend) -> Result<R>) -> Result<R> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        op(inner.backend.as_ref())
    }

    /// Transmit a break for `duration`; zero uses the platform default.
    pub fn send_break(&self, duration: Duration) -> Result<()> {
        self.with_backend(|backend| backend.send_break(duration))
    }

    /// Assert or release the break condition.
    pub fn set_break(&self, level: bool) -> Result<()> {
        self.with_backend(|backend| backend.set_break(level))
    }

    /// Drive the RTS line.
    pub fn set_rts(&self, level: bool) -> Result<()> {
        self.with_backend(|backend| backend.set_rts(level))
    }

    /// Drive the DTR line.
    pub fn set_dtr(&self, level: bool) -> Result<()> {
        self.with_backend(|backend| backend.set_dtr(level))
    }

    /// Sample every modem status line at once.
    pub fn modem_status(&self) -> Result<ModemStatus> {
        self.with_backend(|backend| backend.modem_status())
    }

    /// Clear To Send.
    pub fn cts(&self) -> Result<bool> {
        Ok(self.modem_status()?.cts)
    }

    /// Data Set Ready.
    pub fn dsr(&self) -> Result<bool> {
        Ok(self.modem_status()?.dsr)
    }

    /// Ring Indicator.
    pub fn ri(&self) -> Result<bool> {
        Ok(self.modem_status()?.ri)
    }

    /// Carrier Detect.
    pub fn cd(&self) -> Result<bool> {
        Ok(self.modem_status()?.cd)
    }

    /// Block until CTS, DSR, RI or CD changes. There is no timeout.
    ///
    /// The wait runs on a duplicate handle taken without any port lock held, so
    /// reads, writes and setters proceed meanwhile. Closing the port does not
    /// interrupt it.
    pub fn wait_for_change(&self) -> Result<()> {
        let mut watcher = self.with_backend(|backend| backend.modem_watcher())?;
        watcher.wait()
    }
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Serial")
            .field("port", &inner.port)
            .field("settings", &inner.settings)
            .field("timeout", &inner.timeout)
            .field("open", &inner.backend.is_open())
            .finish()
    }
}

impl Drop for Serial {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.backend.is_open() {
            if let Err(err) = inner.backend.close() {
                debug!(port = %inner.port, error = %err, "close on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Instant;

    /// In-memory device: bytes pushed into `input` are readable, writes land in
    /// `output`.
    #[derive(Debug, Default)]
    struct Loopback {
        open: bool,
        fail_configure: bool,
        input: Arc<Mutex<VecDeque<u8>>>,
        output: Arc<Mutex<Vec<u8>>>,
        modem_wait: Duration,
    }

    /// Reports a modem line change after a fixed delay.
    struct SlowModem(Duration);

    impl ModemWatcher for SlowModem {
        fn wait(&mut self) -> Result<()> {
            thread::sleep(self.0);
            Ok(())
        }
    }

    impl SerialBackend for Loopback {
        fn open(&mut self, _path: &str, settings: &SerialSettings) -> Result<()> {
            self.open = true;
            self.configure(settings)
        }
        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn configure(&mut self, _settings: &SerialSettings) -> Result<()> {
            if self.fail_configure {
                return Err(SoniaError::io_other("configuring loopback", "rejected"));
            }
            Ok(())
        }
        fn available(&self) -> Result<usize> {
            Ok(self.input.lock().len())
        }
        fn wait_readable(&self, timeout: Duration) -> Result<bool> {
            let deadline = Deadline::after(timeout);
            loop {
                if !self.input.lock().is_empty() {
                    return Ok(true);
                }
                if deadline.expired() {
                    return Ok(false);
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
        fn wait_writable(&self, _timeout: Duration) -> Result<bool> {
            Ok(true)
        }
        fn read_nonblocking(&self, buf: &mut [u8]) -> Result<usize> {
            let mut input = self.input.lock();
            let count = buf.len().min(input.len());
            for slot in buf.iter_mut().take(count) {
                *slot = input.pop_front().unwrap_or_default();
            }
            Ok(count)
        }
        fn write_nonblocking(&self, buf: &[u8]) -> Result<usize> {
            self.output.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn drain(&self) -> Result<()> {
            Ok(())
        }
        fn flush_input(&self) -> Result<()> {
            self.input.lock().clear();
            Ok(())
        }
        fn flush_output(&self) -> Result<()> {
            Ok(())
        }
        fn send_break(&self, _duration: Duration) -> Result<()> {
            Ok(())
        }
        fn set_break(&self, _level: bool) -> Result<()> {
            Ok(())
        }
        fn set_rts(&self, _level: bool) -> Result<()> {
            Ok(())
        }
        fn set_dtr(&self, _level: bool) -> Result<()> {
            Ok(())
        }
        fn modem_status(&self) -> Result<ModemStatus> {
            Ok(ModemStatus {
                cts: true,
                ..ModemStatus::default()
            })
        }
        fn modem_watcher(&self) -> Result<Box<dyn ModemWatcher>> {
            Ok(Box::new(SlowModem(self.modem_wait)))
        }
    }

    fn loopback(timeout: Timeout) -> (Serial, Arc<Mutex<VecDeque<u8>>>, Arc<Mutex<Vec<u8>>>) {
        let backend = Loopback::default();
        let input = Arc::clone(&backend.input);
        let output = Arc::clone(&backend.output);
        let serial = Serial::builder("loop0")
            .timeout(timeout)
            .backend(Box::new(backend))
            .open()
            .unwrap();
        (serial, input, output)
    }

    #[test]
    fn empty_port_builds_closed() {
        let serial = Serial::builder("")
            .backend(Box::new(Loopback::default()))
            .open()
            .unwrap();
        assert!(!serial.is_open());
        assert!(matches!(serial.open(), Err(SoniaError::InvalidArgument(_))));
    }

    #[test]
    fn io_on_closed_port_fails() {
        let serial = Serial::builder("loop0")
            .backend(Box::new(Loopback::default()))
            .build()
            .unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(serial.read(&mut buf), Err(SoniaError::PortNotOpened)));
        assert!(matches!(serial.write(b"x"), Err(SoniaError::PortNotOpened)));
        assert!(matches!(serial.cts(), Err(SoniaError::PortNotOpened)));
    }

    #[test]
    fn opening_twice_is_a_logic_error() {
        let (serial, _, _) = loopback(Timeout::default());
        assert!(matches!(serial.open(), Err(SoniaError::Logic(_))));
    }

    #[test]
    fn zero_timeout_returns_what_is_buffered() {
        let (serial, input, _) = loopback(Timeout::default());
        input.lock().extend(b"ab");
        let mut buf = [0u8; 8];
        assert_eq!(serial.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");
    }

    #[test]
    fn total_timeout_returns_partial_count() {
        let (serial, input, _) = loopback(Timeout::simple(30));
        input.lock().extend(b"xyz");
        let mut out = Vec::new();
        assert_eq!(serial.read_to_vec(&mut out, 10).unwrap(), 3);
        assert_eq!(out, b"xyz");
    }

    #[test]
    fn line_reads_stop_at_marker() {
        let (serial, input, _) = loopback(Timeout::simple(20));
        input.lock().extend(b"one\r\ntwo\r\nthr");

        assert_eq!(serial.read_line(DEFAULT_MAX_LINE_LENGTH, "\r\n").unwrap(), "one\r\n");
        let rest = serial.read_lines(DEFAULT_MAX_LINE_LENGTH, "\r\n").unwrap();
        assert_eq!(rest, vec!["two\r\n".to_string(), "thr".to_string()]);
    }

    #[test]
    fn line_read_honours_max_len() {
        let (serial, input, _) = loopback(Timeout::simple(20));
        input.lock().extend(b"abcdef\n");
        assert_eq!(serial.read_line(3, DEFAULT_EOL).unwrap(), "abc");
        assert_eq!(serial.available().unwrap(), 4);
    }

    #[test]
    fn empty_eol_is_invalid() {
        let (serial, _, _) = loopback(Timeout::default());
        assert!(matches!(
            serial.read_line(10, ""),
            Err(SoniaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn writes_reach_the_device() {
        let (serial, _, output) = loopback(Timeout::default());
        assert_eq!(serial.write_str("hello").unwrap(), 5);
        assert_eq!(output.lock().as_slice(), b"hello");
    }

    #[test]
    fn failed_reconfigure_keeps_previous_settings() {
        let backend = Loopback::default();
        let serial = Serial::builder("loop0")
            .backend(Box::new(backend))
            .open()
            .unwrap();
        serial.inner.write().backend = Box::new(Loopback {
            open: true,
            fail_configure: true,
            ..Loopback::default()
        });

        assert!(matches!(
            serial.set_baudrate(115_200),
            Err(SoniaError::Io { .. })
        ));
        assert_eq!(serial.baudrate(), 9600);
    }

    #[test]
    fn byte_time_follows_framing() {
        let (serial, _, _) = loopback(Timeout::default());
        serial.set_baudrate(10_000).unwrap();
        assert_eq!(serial.byte_time(), Duration::from_millis(1));
        serial.set_parity(Parity::Odd).unwrap();
        assert_eq!(serial.byte_time(), Duration::from_micros(1100));
    }

    #[test]
    fn control_lines_go_through_backend() {
        let (serial, _, _) = loopback(Timeout::default());
        assert!(serial.cts().unwrap());
        assert!(!serial.dsr().unwrap());
        serial.set_rts(true).unwrap();
        serial.wait_for_change().unwrap();
    }

    #[test]
    fn modem_wait_does_not_block_setters_or_io() {
        let backend = Loopback {
            modem_wait: Duration::from_secs(2),
            ..Loopback::default()
        };
        let output = Arc::clone(&backend.output);
        let serial = Arc::new(
            Serial::builder("loop0")
                .backend(Box::new(backend))
                .open()
                .unwrap(),
        );

        let waiter = {
            let serial = Arc::clone(&serial);
            thread::spawn(move || serial.wait_for_change())
        };
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let setter = {
            let serial = Arc::clone(&serial);
            thread::spawn(move || {
                serial.set_baudrate(115_200).unwrap();
                started.elapsed()
            })
        };
        thread::sleep(Duration::from_millis(20));

        assert_eq!(serial.write(b"hello").unwrap(), 5);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(setter.join().unwrap() < Duration::from_millis(500));
        assert_eq!(serial.baudrate(), 115_200);
        assert_eq!(output.lock().as_slice(), b"hello");

        waiter.join().unwrap().unwrap();
    }
}
