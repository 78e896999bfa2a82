//! Logfile sink (§4.6): an append-with-lock file object, reopenable on
//! reconfig, journaling one console's traffic.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;

use crate::object::ObjectId;

/// Message sentinels bracketing the timestamp marker line (§6).
pub const MSG_PREFIX: u8 = 0x01;
pub const MSG_SUFFIX: u8 = 0x02;

pub struct LogfileState {
    /// The console this logfile journals.
    pub console: ObjectId,
    pub path: String,
    pub opened_at: SystemTime,
    pub bytes_since_timestamp: u64,
}

impl LogfileState {
    pub fn new(console: ObjectId, path: impl Into<String>) -> LogfileState {
        LogfileState {
            console,
            path: path.into(),
            opened_at: SystemTime::now(),
            bytes_since_timestamp: 0,
        }
    }
}

/// Opens (or reopens) `path` in append mode, takes an advisory write lock,
/// and sets close-on-exec. The lock both protects the file and doubles as
/// a detector for "another instance already owns this log" (§4.6):
/// `flock` fails with `EWOULDBLOCK` if a live instance holds it.
pub fn open_logfile(path: &str, truncate: bool) -> io::Result<RawFd> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(true).mode(0o640);
    if truncate {
        opts.truncate(true);
    } else {
        opts.append(true);
    }
    let file = opts.open(path)?;
    let fd = file.as_raw_fd();

    let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        warn!("unable to lock logfile \"{path}\": {err} (another instance may own it)");
        return Err(err);
    }

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags >= 0 {
        unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    }

    Ok(file.into_raw_fd())
}

/// Formats a local-time timestamp marker line exactly as specified (§6):
/// `\x01Console [<name>] log at <localtime>\x02\r\n`, where the sentinel
/// suffix precedes the trailing CRLF.
pub fn format_timestamp_line(console_name: &str, localtime: &str) -> Vec<u8> {
    let mut line = Vec::new();
    line.push(MSG_PREFIX);
    line.extend_from_slice(format!("Console [{console_name}] log at {localtime}").as_bytes());
    line.push(MSG_SUFFIX);
    line.extend_from_slice(b"\r\n");
    line
}

/// Renders the current local time the way the original implementation's
/// `create_long_time_string` does, e.g. `Sun Jul 26 09:41:03 2026`.
/// `libc::localtime_r` is used directly since no chrono-family dependency
/// is otherwise needed by this crate.
pub fn local_time_string() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let secs = now.as_secs() as libc::time_t;
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    unsafe { libc::localtime_r(&secs, &mut tm) };

    let weekdays = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    let months = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    format!(
        "{} {} {:2} {:02}:{:02}:{:02} {}",
        weekdays[(tm.tm_wday as usize) % 7],
        months[(tm.tm_mon as usize) % 12],
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec,
        1900 + tm.tm_year,
    )
}

/// Local (hour, minute) of the current wall clock, used by the timestamp
/// scheduler's first-deadline arithmetic (§4.6 expansion).
pub fn local_hour_minute() -> (i32, i32) {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let secs = now.as_secs() as libc::time_t;
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    unsafe { libc::localtime_r(&secs, &mut tm) };
    (tm.tm_hour, tm.tm_min)
}

/// Minutes-past-local-midnight of the *first* timestamp deadline, computed
/// as though timestamps had fired regularly every `interval_minutes` since
/// midnight (so wall-clock alignment survives restarts), exactly mirroring
/// the original `schedule_timestamp`'s arithmetic.
pub fn first_deadline_minutes(hour: i32, minute: i32, interval_minutes: u32) -> u32 {
    let elapsed = (hour as u32) * 60 + (minute as u32);
    let completed = elapsed / interval_minutes;
    (completed + 1) * interval_minutes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_line_has_exact_framing() {
        let line = format_timestamp_line("alpha", "Sun Jul 26 09:41:03 2026");
        assert_eq!(line[0], MSG_PREFIX);
        assert!(line.starts_with(&[MSG_PREFIX]));
        assert_eq!(&line[line.len() - 3..], b"\x02\r\n");
        assert!(line.windows(5).any(|w| w == b"alpha"));
    }

    #[test]
    fn first_deadline_rounds_up_to_next_interval() {
        // 09:41 with a 15-minute interval: 9*60+41=581, 581/15=38 completed,
        // so the next boundary is (38+1)*15 = 585 minutes = 09:45.
        assert_eq!(first_deadline_minutes(9, 41, 15), 585);
        assert_eq!(585 / 60, 9);
        assert_eq!(585 % 60, 45);
    }

    #[test]
    fn first_deadline_at_exact_boundary_still_advances() {
        // 10:00 with a 30-minute interval: exactly on the grid, so the
        // next deadline is the *following* boundary, not the current one.
        assert_eq!(first_deadline_minutes(10, 0, 30), 630);
        assert_eq!(630 / 60, 10);
        assert_eq!(630 % 60, 30);
    }
}
