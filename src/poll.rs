//! Readiness poller (§4.2): a thin wrapper over POSIX `poll(2)`.
//!
//! Re-armed from scratch every iteration, as the design calls for — cheap
//! at the object counts this daemon runs (dozens to hundreds of fds) and
//! avoids stale interest bits surviving fd re-use after an object is
//! closed and a new one opened on the same descriptor.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Helper macro to execute a system call that returns an `io::Result`,
/// matching the convention used throughout this crate's raw-fd plumbing.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

/// Declares a minimal newtype bitset without depending on the `bitflags`
/// crate, since only two such types exist in this module.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $repr);

        impl $name {
            pub const EMPTY: $name = $name(0);
            $(pub const $variant: $name = $name($value);)*

            pub fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0 && other.0 != 0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }
    };
}

bitflags_like! {
    /// Interest/revent bits. Deliberately a tiny hand-rolled bitset rather
    /// than pulling in `bitflags` for three values.
    pub struct Interest: i16 {
        const READ = libc::POLLIN;
        const WRITE = libc::POLLOUT;
    }
}

bitflags_like! {
    pub struct Revents: i16 {
        const READ = libc::POLLIN;
        const WRITE = libc::POLLOUT;
        const HUP = libc::POLLHUP;
        const ERR = libc::POLLERR;
    }
}

/// Thin wrapper over `poll(2)`. Interest is tracked per-fd and rebuilt
/// into a `Vec<pollfd>` each call to `poll`.
pub struct Poller {
    interest: HashMap<RawFd, Interest>,
    last_revents: HashMap<RawFd, Revents>,
    /// Preserves registration order so iteration order is stable across
    /// ticks (the event loop relies on "list order is preserved", §4.8).
    order: Vec<RawFd>,
}

impl Poller {
    pub fn new() -> io::Result<Poller> {
        Ok(Poller { interest: HashMap::new(), last_revents: HashMap::new(), order: Vec::new() })
    }

    pub fn clear_all_fds(&mut self) {
        self.interest.clear();
        self.order.clear();
    }

    pub fn set_interest(&mut self, fd: RawFd, bits: Interest) {
        if self.interest.insert(fd, bits).is_none() {
            self.order.push(fd);
        } else if let Some(cur) = self.interest.get_mut(&fd) {
            *cur = bits;
        }
    }

    /// Blocks for at most `timeout`, or indefinitely if `None`.
    /// Distinguishes `EINTR` from other errors by returning it verbatim;
    /// callers must recheck shutdown/reconfig flags on that error (§4.2).
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut pollfds: Vec<libc::pollfd> = self
            .order
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: self.interest.get(&fd).copied().unwrap_or(Interest::EMPTY).0,
                revents: 0,
            })
            .collect();

        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as libc::c_int,
            None => -1,
        };

        let n = syscall!(poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms))?;

        self.last_revents.clear();
        for pfd in &pollfds {
            if pfd.revents != 0 {
                self.last_revents.insert(pfd.fd, Revents(pfd.revents));
            }
        }
        Ok(n as usize)
    }

    pub fn revents(&self, fd: RawFd) -> Revents {
        self.last_revents.get(&fd).copied().unwrap_or(Revents::EMPTY)
    }

    pub fn is_set(&self, fd: RawFd, mask: Revents) -> bool {
        self.revents(fd).0 & mask.0 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_with_no_fds_times_out_cleanly() {
        let mut poller = Poller::new().unwrap();
        let n = poller.poll(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn pipe_becomes_readable_after_write() {
        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let mut poller = Poller::new().unwrap();
        poller.set_interest(read_fd, Interest::READ);
        assert_eq!(poller.poll(Some(Duration::from_millis(10))).unwrap(), 0);

        let byte = [1u8];
        unsafe { libc::write(write_fd, byte.as_ptr() as *const _, 1) };
        assert_eq!(poller.poll(Some(Duration::from_millis(50))).unwrap(), 1);
        assert!(poller.is_set(read_fd, Revents::READ));

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}
