//! Serial console endpoint (§4.5): open/configure/reopen of a local
//! TTY-like device, sharing the telnet console's reconnect backoff.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use log::{debug, warn};

const BACKOFF_INITIAL: Duration = Duration::from_secs(10);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub device: String,
    pub baud: u32,
    pub parity: Parity,
    pub data_bits: u8,
}

pub struct SerialState {
    pub config: SerialConfig,
    pub down: bool,
    pub backoff: Duration,
    pub reconnect_deadline: Option<Instant>,
}

impl SerialState {
    pub fn new(config: SerialConfig) -> SerialState {
        SerialState { config, down: false, backoff: BACKOFF_INITIAL, reconnect_deadline: None }
    }

    pub fn fail(&mut self, now: Instant) -> Duration {
        self.down = true;
        let delay = self.backoff;
        self.reconnect_deadline = Some(now + delay);
        self.backoff = (self.backoff * 2).min(BACKOFF_CAP);
        delay
    }

    pub fn recover(&mut self) {
        self.down = false;
        self.backoff = BACKOFF_INITIAL;
        self.reconnect_deadline = None;
    }
}

fn baud_constant(baud: u32) -> Option<libc::speed_t> {
    Some(match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        _ => return None,
    })
}

/// Opens `cfg.device` non-blocking, puts the line discipline in raw mode,
/// applies the configured baud rate, and sets close-on-exec.
pub fn open_serial(cfg: &SerialConfig) -> io::Result<RawFd> {
    let path = CString::new(cfg.device.as_str())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "device path has interior NUL"))?;

    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = configure_termios(fd, cfg) {
        unsafe { libc::close(fd) };
        return Err(e);
    }

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags >= 0 {
        unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    }

    debug!("opened serial device {} (fd={fd})", cfg.device);
    Ok(fd)
}

fn configure_termios(fd: RawFd, cfg: &SerialConfig) -> io::Result<()> {
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(io::Error::last_os_error());
    }

    unsafe { libc::cfmakeraw(&mut tio) };

    tio.c_cflag &= !libc::CSIZE;
    tio.c_cflag |= match cfg.data_bits {
        5 => libc::CS5,
        6 => libc::CS6,
        7 => libc::CS7,
        _ => libc::CS8,
    };

    match cfg.parity {
        Parity::None => tio.c_cflag &= !libc::PARENB,
        Parity::Even => {
            tio.c_cflag |= libc::PARENB;
            tio.c_cflag &= !libc::PARODD;
        }
        Parity::Odd => {
            tio.c_cflag |= libc::PARENB;
            tio.c_cflag |= libc::PARODD;
        }
    }

    if let Some(speed) = baud_constant(cfg.baud) {
        unsafe {
            libc::cfsetispeed(&mut tio, speed);
            libc::cfsetospeed(&mut tio, speed);
        }
    } else {
        warn!("unsupported baud rate {} for {}, leaving current speed", cfg.baud, cfg.device);
    }

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_shares_telnet_profile() {
        let mut s = SerialState::new(SerialConfig {
            device: "/dev/null".into(),
            baud: 9600,
            parity: Parity::None,
            data_bits: 8,
        });
        let now = Instant::now();
        assert_eq!(s.fail(now), Duration::from_secs(10));
        assert_eq!(s.fail(now), Duration::from_secs(20));
        s.recover();
        assert!(!s.down);
        assert_eq!(s.backoff, BACKOFF_INITIAL);
    }

    #[test]
    fn unknown_baud_is_rejected_gracefully() {
        assert!(baud_constant(1_234_567).is_none());
        assert!(baud_constant(9600).is_some());
    }
}
