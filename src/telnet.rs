//! Telnet console endpoint (§4.4): connection bring-up, RFC 854 option
//! negotiation, and IAC processing over a plain TCP byte stream.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::time::{Duration, Instant};

use log::{debug, trace};

pub const IAC: u8 = 0xFF;
const WILL: u8 = 0xFB;
const WONT: u8 = 0xFC;
const DO: u8 = 0xFD;
const DONT: u8 = 0xFE;
const SB: u8 = 0xFA;
const SE: u8 = 0xF0;

const OPT_ECHO: u8 = 1;
const OPT_SUPPRESS_GA: u8 = 3;

const BACKOFF_INITIAL: Duration = Duration::from_secs(10);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Down,
    Pending,
    Up,
}

/// Parser state for the subset of RFC 854 this daemon implements: it
/// refuses every option it does not itself negotiate, and only tracks
/// enough state to recognize `IAC cmd` / `IAC opt cmd` framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IacParse {
    Data,
    SawIac,
    SawCommand(u8),
    InSubnegotiation,
    SubnegotiationSawIac,
}

pub struct TelnetState {
    pub host: String,
    pub port: u16,
    pub state: ConnState,
    parse: IacParse,
    echo_offered: bool,
    pub backoff: Duration,
    pub reconnect_deadline: Option<Instant>,
}

impl TelnetState {
    pub fn new(host: impl Into<String>, port: u16, echo_offered: bool) -> TelnetState {
        TelnetState {
            host: host.into(),
            port,
            state: ConnState::Down,
            parse: IacParse::Data,
            echo_offered,
            backoff: BACKOFF_INITIAL,
            reconnect_deadline: None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.state == ConnState::Up
    }

    /// DOWN -> PENDING: issue a non-blocking `connect(2)` directly so the
    /// single-threaded loop never stalls waiting on a TCP handshake
    /// (§4.4, §5 "Suspension points: only the `poll` call"). DNS
    /// resolution via `ToSocketAddrs` is the one blocking step left, the
    /// same tradeoff the original implementation's `getaddrinfo` call made.
    pub fn connect(&mut self) -> io::Result<RawFd> {
        let addr = format!("{}:{}", self.host, self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))?;

        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            let cloexec = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, cloexec | libc::FD_CLOEXEC);
        }

        let std::net::SocketAddr::V4(v4) = addr else {
            unsafe { libc::close(fd) };
            return Err(io::Error::new(io::ErrorKind::Unsupported, "only IPv4 targets are supported"));
        };
        let mut sockaddr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        sockaddr.sin_family = libc::AF_INET as libc::sa_family_t;
        sockaddr.sin_port = v4.port().to_be();
        sockaddr.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());

        let rc = unsafe {
            libc::connect(
                fd,
                &sockaddr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                unsafe { libc::close(fd) };
                return Err(err);
            }
        }

        self.state = ConnState::Pending;
        trace!("telnet [{}:{}] connecting", self.host, self.port);
        Ok(fd)
    }

    /// PENDING -> UP on a writable event with `SO_ERROR == 0`; PENDING ->
    /// DOWN (with backoff armed) otherwise.
    pub fn advance_pending(&mut self, fd: RawFd) -> Result<Vec<u8>, io::Error> {
        let mut err: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        if err != 0 {
            return Err(io::Error::from_raw_os_error(err));
        }
        self.state = ConnState::Up;
        self.backoff = BACKOFF_INITIAL;
        debug!("telnet [{}:{}] connected", self.host, self.port);
        Ok(self.initial_negotiation())
    }

    fn initial_negotiation(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&[IAC, WILL, OPT_SUPPRESS_GA]);
        out.extend_from_slice(&[IAC, DO, OPT_SUPPRESS_GA]);
        if self.echo_offered {
            out.extend_from_slice(&[IAC, WILL, OPT_ECHO]);
        } else {
            out.extend_from_slice(&[IAC, WONT, OPT_ECHO]);
        }
        out
    }

    /// Arms the reconnect timer with exponential backoff (initial 10s,
    /// doubling, capped at 300s) and transitions to DOWN.
    pub fn fail(&mut self, now: Instant) -> Duration {
        self.state = ConnState::Down;
        let delay = self.backoff;
        self.reconnect_deadline = Some(now + delay);
        self.backoff = (self.backoff * 2).min(BACKOFF_CAP);
        delay
    }

    /// Consumes `input`, stripping telnet option-negotiation sequences and
    /// answering them per "refuse everything we do not implement". Returns
    /// the passthrough bytes destined for readers and any reply bytes that
    /// must be written back to the console.
    pub fn decode(&mut self, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut passthrough = Vec::with_capacity(input.len());
        let mut reply = Vec::new();

        for &b in input {
            match self.parse {
                IacParse::Data => {
                    if b == IAC {
                        self.parse = IacParse::SawIac;
                    } else {
                        passthrough.push(b);
                    }
                }
                IacParse::SawIac => match b {
                    IAC => {
                        // Escaped literal 0xFF byte.
                        passthrough.push(IAC);
                        self.parse = IacParse::Data;
                    }
                    SB => self.parse = IacParse::InSubnegotiation,
                    WILL | WONT | DO | DONT => self.parse = IacParse::SawCommand(b),
                    _ => self.parse = IacParse::Data, // NOP, GA, etc: no reply needed
                },
                IacParse::SawCommand(cmd) => {
                    reply.extend_from_slice(&self.negotiate(cmd, b));
                    self.parse = IacParse::Data;
                }
                IacParse::InSubnegotiation => {
                    if b == IAC {
                        self.parse = IacParse::SubnegotiationSawIac;
                    }
                }
                IacParse::SubnegotiationSawIac => {
                    self.parse = if b == SE { IacParse::Data } else { IacParse::InSubnegotiation };
                }
            }
        }
        (passthrough, reply)
    }

    /// We refuse every option we do not implement ourselves: answer `DO`
    /// with `WONT` and `WILL` with `DONT`, unless it is one of the two
    /// options we actively negotiated at connect time.
    fn negotiate(&self, cmd: u8, opt: u8) -> Vec<u8> {
        let known = matches!(opt, OPT_SUPPRESS_GA | OPT_ECHO);
        match cmd {
            DO if known => vec![],
            DO => vec![IAC, WONT, opt],
            WILL if known => vec![],
            WILL => vec![IAC, DONT, opt],
            _ => vec![],
        }
    }
}

pub fn close_fd(fd: RawFd) {
    if fd >= 0 {
        unsafe {
            let _ = TcpStream::from_raw_fd(fd);
        } // dropped, closing it
    }
}

pub fn set_keepalive(fd: RawFd, enable: bool) -> io::Result<()> {
    let on: libc::c_int = if enable { 1 } else { 0 };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub fn raw_fd_of(stream: &TcpStream) -> RawFd {
    stream.as_raw_fd()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_and_refuses_unknown_option() {
        let mut t = TelnetState::new("example", 23, false);
        t.state = ConnState::Up;
        let input = [b'h', b'i', IAC, DO, 31, b'!'];
        let (data, reply) = t.decode(&input);
        assert_eq!(data, b"hi!");
        assert_eq!(reply, vec![IAC, WONT, 31]);
    }

    #[test]
    fn doubled_iac_is_passthrough_literal() {
        let mut t = TelnetState::new("example", 23, false);
        let input = [IAC, IAC, b'x'];
        let (data, reply) = t.decode(&input);
        assert_eq!(data, vec![IAC, b'x']);
        assert!(reply.is_empty());
    }

    #[test]
    fn subnegotiation_is_swallowed() {
        let mut t = TelnetState::new("example", 23, false);
        let input = [IAC, SB, 1, 2, 3, IAC, SE, b'z'];
        let (data, _) = t.decode(&input);
        assert_eq!(data, b"z");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut t = TelnetState::new("example", 23, false);
        let now = Instant::now();
        assert_eq!(t.fail(now), Duration::from_secs(10));
        assert_eq!(t.fail(now), Duration::from_secs(20));
        assert_eq!(t.fail(now), Duration::from_secs(40));
        for _ in 0..10 {
            t.fail(now);
        }
        assert_eq!(t.backoff, BACKOFF_CAP);
    }
}
