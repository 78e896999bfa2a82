//! Listener & accept path (§4.10): non-blocking accept loop, optional
//! keepalive, hand-off of the raw accepted fd to the external session
//! worker.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use log::{error, trace};

use crate::error::ConsoledError;
use crate::telnet::set_keepalive;

pub struct Listener {
    pub fd: RawFd,
}

impl Listener {
    /// Creates the non-blocking listening socket, `SO_REUSEADDR`, bound to
    /// loopback or any-interface per `loopback_only` (§4.10).
    pub fn bind(port: u16, loopback_only: bool) -> Result<Listener, ConsoledError> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(ConsoledError::Bind { port, source: io::Error::last_os_error() });
        }

        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            let cloexec = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, cloexec | libc::FD_CLOEXEC);

            let on: libc::c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &on as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }

        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = if loopback_only {
            u32::from_be_bytes([127, 0, 0, 1]).to_be()
        } else {
            libc::INADDR_ANY.to_be()
        };

        let bind_rc = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if bind_rc != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ConsoledError::Bind { port, source: err });
        }

        if unsafe { libc::listen(fd, 10) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ConsoledError::Bind { port, source: err });
        }

        Ok(Listener { fd })
    }

    /// Accepts every pending connection until `EAGAIN`/`EWOULDBLOCK`/
    /// `ECONNABORTED` (§4.10), applying `SO_KEEPALIVE` when requested and
    /// handing each accepted fd to `on_accept`.
    pub fn accept_all(&self, keep_alive: bool, mut on_accept: impl FnMut(RawFd)) {
        loop {
            let sd = unsafe { libc::accept(self.fd, std::ptr::null_mut(), std::ptr::null_mut()) };
            if sd < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(e) if e == libc::EINTR => continue,
                    Some(e) if e == libc::EAGAIN || e == libc::EWOULDBLOCK => return,
                    Some(e) if e == libc::ECONNABORTED => return,
                    _ => {
                        error!("unable to accept new connection: {err}");
                        return;
                    }
                }
            }
            trace!("accepted new client on fd={sd}");
            if keep_alive {
                if let Err(e) = set_keepalive(sd, true) {
                    error!("unable to set KEEPALIVE socket option: {e}");
                }
            }
            on_accept(sd);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}
