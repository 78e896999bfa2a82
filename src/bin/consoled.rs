//! Minimal runnable wiring around the `consoled` core: builds a
//! `ServerConfig` from argv, installs signal handlers, and runs the
//! event loop. The client-protocol greeting is out of scope for the
//! core (§1), so this binary supplies the simplest possible stand-in: a
//! worker thread that reads one line (`<name> <mode>`) from a freshly
//! accepted socket and attaches the client to every configured console.

use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::os::unix::io::{FromRawFd, RawFd};

use log::{debug, error, info};

use consoled::client::{PendingClient, SessionMode};
use consoled::config::{default_telnet, ServerConfig, SyslogFacility};
use consoled::handoff::AttachQueue;
use consoled::{signals, Multiplexer};

fn main() {
    let config = build_config_from_args();

    env_logger::Builder::new().filter_level(config.log_level).init();

    if log::log_enabled!(log::Level::Debug) {
        debug!("effective configuration: {config:?}");
    }

    signals::install();

    let mut mux = match Multiplexer::new(config, accept_hook) {
        Ok(mux) => mux,
        Err(e) => {
            error!("fatal: {e}");
            std::process::exit(1);
        }
    };

    mux.run();
}

/// Hands an accepted fd to a one-shot greeting thread, mirroring the
/// worker-pool model in §5: blocking I/O on exactly one socket, then a
/// single push onto the attach queue.
fn accept_hook(fd: RawFd, queue: &AttachQueue) {
    let queue = queue.clone();
    std::thread::spawn(move || greet_client(fd, &queue));
}

fn greet_client(fd: RawFd, queue: &AttachQueue) {
    let stream = unsafe { TcpStream::from_raw_fd(fd) };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).is_err() || line.is_empty() {
        return;
    }

    let mut parts = line.trim_end().splitn(2, ' ');
    let name = parts.next().unwrap_or("anonymous").to_string();
    let mode = match parts.next() {
        Some("interactive") => SessionMode::Interactive,
        Some("broadcast") => SessionMode::Broadcast,
        _ => SessionMode::Monitor,
    };
    let write_privileged = mode != SessionMode::Monitor;

    info!("client [{name}] greeted in {mode:?} mode");

    queue.push(PendingClient {
        name,
        fd,
        mode,
        write_privileged,
        console_names: vec!["alpha".to_string()],
    });

    // The fd is now owned by the event loop via the attached object;
    // release it from this thread's `TcpStream` without closing it.
    std::mem::forget(reader.into_inner());
}

fn build_config_from_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut telnet_target = "127.0.0.1:9999".to_string();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                if let Some(v) = args.get(i + 1).and_then(|s| s.parse().ok()) {
                    config.listen_port = v;
                }
                i += 2;
            }
            "--console" => {
                if let Some(v) = args.get(i + 1) {
                    telnet_target = v.clone();
                }
                i += 2;
            }
            "--verbose" => {
                config.log_level = log::LevelFilter::Debug;
                i += 1;
            }
            _ => i += 1,
        }
    }

    let (host, port) = telnet_target
        .rsplit_once(':')
        .map(|(h, p)| (h.to_string(), p.parse().unwrap_or(23)))
        .unwrap_or((telnet_target.clone(), 23));

    config.consoles.push(default_telnet("alpha", &host, port));
    config.syslog_facility = SyslogFacility::Disabled;
    config
}
