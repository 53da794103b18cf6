//! POSIX terminal device backend.
//!
//! The device is opened non-blocking with `O_NOCTTY`, switched to raw mode with
//! `VMIN = VTIME = 0`, and all blocking is done with `poll(2)` so the caller keeps
//! full control over timeouts. Modem lines use the `TIOCM*` ioctls.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices, Termios,
};
use tracing::{debug, trace};

use super::backend::{ModemStatus, ModemWatcher, SerialBackend};
use super::settings::{ByteSize, FlowControl, Parity, SerialSettings, StopBits};
use crate::error::{Result, SoniaError};
use crate::sys::timer::Deadline;

#[allow(unsafe_code)]
mod ioctl {
    nix::ioctl_read_bad!(fionread, libc::FIONREAD, libc::c_int);
    nix::ioctl_read_bad!(tiocmget, libc::TIOCMGET, libc::c_int);
    nix::ioctl_write_ptr_bad!(tiocmbis, libc::TIOCMBIS, libc::c_int);
    nix::ioctl_write_ptr_bad!(tiocmbic, libc::TIOCMBIC, libc::c_int);
    nix::ioctl_none_bad!(tiocsbrk, libc::TIOCSBRK);
    nix::ioctl_none_bad!(tioccbrk, libc::TIOCCBRK);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    nix::ioctl_write_int_bad!(tiocmiwait, 0x545C);
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MODEM_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Serial backend over a POSIX terminal device.
#[derive(Debug, Default)]
pub struct TtyPort {
    path: String,
    file: Option<File>,
}

impl TtyPort {
    /// Create a closed port.
    pub fn new() -> Self {
        Self::default()
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(SoniaError::PortNotOpened)
    }

    fn context(&self, action: &str) -> String {
        format!("{action} {}", self.path)
    }

    fn poll_for(&self, wanted: PollFlags, timeout: Duration) -> Result<bool> {
        let file = self.file()?;
        let deadline = Deadline::after(timeout);
        loop {
            let mut fds = [PollFd::new(file.as_fd(), wanted)];
            let millis = poll_millis(deadline.remaining());
            let timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);
            match poll(&mut fds, timeout) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
                    if revents.intersects(wanted) {
                        return Ok(true);
                    }
                    if revents
                        .intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL)
                    {
                        return Err(SoniaError::io_other(
                            self.context("polling"),
                            "device hung up or reported an error",
                        ));
                    }
                }
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(SoniaError::io(self.context("polling"), errno)),
            }
            if deadline.expired() {
                return Ok(false);
            }
        }
    }

    fn modem_bits(&self) -> Result<libc::c_int> {
        read_modem_bits(self.file()?)
            .map_err(|e| SoniaError::io(self.context("reading modem lines of"), e))
    }

    fn set_modem_bit(&self, bit: libc::c_int, level: bool) -> Result<()> {
        let fd = self.file()?.as_raw_fd();
        // SAFETY: fd is an open descriptor owned by self and `bit` outlives the call.
        #[allow(unsafe_code)]
        let outcome = unsafe {
            if level {
                ioctl::tiocmbis(fd, &bit)
            } else {
                ioctl::tiocmbic(fd, &bit)
            }
        };
        outcome.map_err(|e| SoniaError::io(self.context("setting modem lines of"), e))?;
        Ok(())
    }
}

fn read_modem_bits(file: &File) -> nix::Result<libc::c_int> {
    let mut bits: libc::c_int = 0;
    // SAFETY: the descriptor belongs to `file`, which outlives the call, as does `bits`.
    #[allow(unsafe_code)]
    let outcome = unsafe { ioctl::tiocmget(file.as_raw_fd(), &mut bits) };
    outcome.map(|_| bits)
}

fn poll_millis(remaining: Duration) -> i32 {
    let millis = remaining.as_nanos().div_ceil(1_000_000);
    i32::try_from(millis).unwrap_or(i32::MAX)
}

/// Map a numeric rate onto the termios speed constants.
fn baud_rate(baud: u32) -> Option<BaudRate> {
    let rate = match baud {
        50 => BaudRate::B50,
        75 => BaudRate::B75,
        110 => BaudRate::B110,
        134 => BaudRate::B134,
        150 => BaudRate::B150,
        200 => BaudRate::B200,
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        1800 => BaudRate::B1800,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460800 => BaudRate::B460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        500000 => BaudRate::B500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        576000 => BaudRate::B576000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921600 => BaudRate::B921600,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1000000 => BaudRate::B1000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1152000 => BaudRate::B1152000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        1500000 => BaudRate::B1500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2000000 => BaudRate::B2000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        2500000 => BaudRate::B2500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3000000 => BaudRate::B3000000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        3500000 => BaudRate::B3500000,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        4000000 => BaudRate::B4000000,
        _ => return None,
    };
    Some(rate)
}

/// Raw-mode attributes for `settings`, derived from the current `termios`.
fn raw_attributes(mut tio: Termios, settings: &SerialSettings) -> Result<Termios> {
    let speed = baud_rate(settings.baudrate).ok_or_else(|| {
        SoniaError::invalid(format!(
            "baud rate {} has no termios speed constant",
            settings.baudrate
        ))
    })?;

    termios::cfmakeraw(&mut tio);
    tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
    tio.local_flags &= !(LocalFlags::ICANON
        | LocalFlags::ECHO
        | LocalFlags::ECHOE
        | LocalFlags::ECHOK
        | LocalFlags::ECHONL
        | LocalFlags::ISIG
        | LocalFlags::IEXTEN);
    tio.output_flags &= !OutputFlags::OPOST;
    tio.input_flags &= !(InputFlags::INLCR
        | InputFlags::IGNCR
        | InputFlags::ICRNL
        | InputFlags::IGNBRK
        | InputFlags::PARMRK
        | InputFlags::INPCK
        | InputFlags::ISTRIP);

    termios::cfsetspeed(&mut tio, speed)
        .map_err(|e| SoniaError::invalid(format!("cannot set baud rate: {e}")))?;

    tio.control_flags &= !ControlFlags::CSIZE;
    tio.control_flags |= match settings.bytesize {
        ByteSize::Five => ControlFlags::CS5,
        ByteSize::Six => ControlFlags::CS6,
        ByteSize::Seven => ControlFlags::CS7,
        ByteSize::Eight => ControlFlags::CS8,
    };

    match settings.stopbits {
        StopBits::One => tio.control_flags &= !ControlFlags::CSTOPB,
        // POSIX has no 1.5: two stop bits is the closest framing.
        StopBits::OnePointFive | StopBits::Two => tio.control_flags |= ControlFlags::CSTOPB,
    }

    tio.control_flags &= !(ControlFlags::PARENB | ControlFlags::PARODD);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        tio.control_flags &= !ControlFlags::from_bits_retain(libc::CMSPAR);
    }
    match settings.parity {
        Parity::None => {}
        Parity::Even => tio.control_flags |= ControlFlags::PARENB,
        Parity::Odd => tio.control_flags |= ControlFlags::PARENB | ControlFlags::PARODD,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Parity::Mark => {
            tio.control_flags |= ControlFlags::PARENB
                | ControlFlags::PARODD
                | ControlFlags::from_bits_retain(libc::CMSPAR);
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Parity::Space => {
            tio.control_flags |= ControlFlags::PARENB | ControlFlags::from_bits_retain(libc::CMSPAR);
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        Parity::Mark | Parity::Space => {
            return Err(SoniaError::invalid(
                "mark and space parity are not supported on this platform",
            ));
        }
    }

    tio.input_flags &= !(InputFlags::IXON | InputFlags::IXOFF | InputFlags::IXANY);
    tio.control_flags &= !ControlFlags::CRTSCTS;
    match settings.flowcontrol {
        FlowControl::None => {}
        FlowControl::Software => tio.input_flags |= InputFlags::IXON | InputFlags::IXOFF,
        FlowControl::Hardware => tio.control_flags |= ControlFlags::CRTSCTS,
    }

    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    Ok(tio)
}

impl SerialBackend for TtyPort {
    fn open(&mut self, path: &str, settings: &SerialSettings) -> Result<()> {
        if self.file.is_some() {
            return Err(SoniaError::logic(format!("{} is already open", self.path)));
        }
        self.path = path.to_string();

        let file = loop {
            match OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
                .open(path)
            {
                Ok(file) => break file,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SoniaError::io(self.context("opening"), e)),
            }
        };

        self.file = Some(file);
        if let Err(err) = self.configure(settings) {
            self.file = None;
            return Err(err);
        }
        debug!(port = %self.path, settings = %settings, "tty opened");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            debug!(port = %self.path, "tty closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn configure(&mut self, settings: &SerialSettings) -> Result<()> {
        let file = self.file()?;
        let current = termios::tcgetattr(file.as_fd())
            .map_err(|e| SoniaError::io(self.context("reading attributes of"), e))?;
        let tio = raw_attributes(current, settings)?;
        termios::tcsetattr(file.as_fd(), SetArg::TCSANOW, &tio)
            .map_err(|e| SoniaError::io(self.context("applying attributes to"), e))?;
        trace!(port = %self.path, settings = %settings, "attributes applied");
        Ok(())
    }

    fn available(&self) -> Result<usize> {
        let fd = self.file()?.as_raw_fd();
        let mut count: libc::c_int = 0;
        // SAFETY: fd is an open descriptor owned by self and `count` outlives the call.
        #[allow(unsafe_code)]
        let outcome = unsafe { ioctl::fionread(fd, &mut count) };
        outcome.map_err(|e| SoniaError::io(self.context("querying input buffer of"), e))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        self.poll_for(PollFlags::POLLIN, timeout)
    }

    fn wait_writable(&self, timeout: Duration) -> Result<bool> {
        self.poll_for(PollFlags::POLLOUT, timeout)
    }

    fn read_nonblocking(&self, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.file()?;
        loop {
            match file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SoniaError::io(self.context("reading from"), e)),
            }
        }
    }

    fn write_nonblocking(&self, buf: &[u8]) -> Result<usize> {
        let mut file = self.file()?;
        loop {
            match file.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SoniaError::io(self.context("writing to"), e)),
            }
        }
    }

    fn drain(&self) -> Result<()> {
        termios::tcdrain(self.file()?.as_fd())
            .map_err(|e| SoniaError::io(self.context("draining"), e))
    }

    fn flush_input(&self) -> Result<()> {
        termios::tcflush(self.file()?.as_fd(), FlushArg::TCIFLUSH)
            .map_err(|e| SoniaError::io(self.context("flushing input of"), e))
    }

    fn flush_output(&self) -> Result<()> {
        termios::tcflush(self.file()?.as_fd(), FlushArg::TCOFLUSH)
            .map_err(|e| SoniaError::io(self.context("flushing output of"), e))
    }

    fn send_break(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return termios::tcsendbreak(self.file()?.as_fd(), 0)
                .map_err(|e| SoniaError::io(self.context("sending break on"), e));
        }
        self.set_break(true)?;
        thread::sleep(duration);
        self.set_break(false)
    }

    fn set_break(&self, level: bool) -> Result<()> {
        let fd = self.file()?.as_raw_fd();
        // SAFETY: fd is an open descriptor owned by self.
        #[allow(unsafe_code)]
        let outcome = unsafe {
            if level {
                ioctl::tiocsbrk(fd)
            } else {
                ioctl::tioccbrk(fd)
            }
        };
        outcome.map_err(|e| SoniaError::io(self.context("setting break on"), e))?;
        Ok(())
    }

    fn set_rts(&self, level: bool) -> Result<()> {
        self.set_modem_bit(libc::TIOCM_RTS, level)
    }

    fn set_dtr(&self, level: bool) -> Result<()> {
        self.set_modem_bit(libc::TIOCM_DTR, level)
    }

    fn modem_status(&self) -> Result<ModemStatus> {
        let bits = self.modem_bits()?;
        Ok(ModemStatus {
            cts: bits & libc::TIOCM_CTS != 0,
            dsr: bits & libc::TIOCM_DSR != 0,
            ri: bits & libc::TIOCM_RI != 0,
            cd: bits & libc::TIOCM_CD != 0,
        })
    }

    fn modem_watcher(&self) -> Result<Box<dyn ModemWatcher>> {
        let file = self
            .file()?
            .try_clone()
            .map_err(|e| SoniaError::io(self.context("duplicating handle of"), e))?;
        Ok(Box::new(TtyModemWatcher {
            path: self.path.clone(),
            file,
        }))
    }
}

/// Modem line watcher over a duplicated descriptor of a [`TtyPort`].
#[derive(Debug)]
struct TtyModemWatcher {
    path: String,
    file: File,
}

impl ModemWatcher for TtyModemWatcher {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn wait(&mut self) -> Result<()> {
        let fd = self.file.as_raw_fd();
        let mask = libc::TIOCM_CTS | libc::TIOCM_DSR | libc::TIOCM_RI | libc::TIOCM_CD;
        loop {
            // SAFETY: fd belongs to self.file, which outlives the call; the mask is passed by value.
            #[allow(unsafe_code)]
            let outcome = unsafe { ioctl::tiocmiwait(fd, mask) };
            match outcome {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    return Err(SoniaError::io(
                        format!("waiting for modem line change on {}", self.path),
                        errno,
                    ))
                }
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn wait(&mut self) -> Result<()> {
        let sample = |file: &File| {
            read_modem_bits(file).map_err(|e| {
                SoniaError::io(format!("reading modem lines of {}", self.path), e)
            })
        };
        let initial = sample(&self.file)?;
        loop {
            thread::sleep(MODEM_POLL_INTERVAL);
            if sample(&self.file)? != initial {
                return Ok(());
            }
        }
    }
}
