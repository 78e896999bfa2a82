//! End-to-end checks driving the public `Multiplexer` API the way a
//! real session worker and a real console would: real loopback sockets
//! on both ends, stepped through `run_once` rather than poking internal
//! state.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::IntoRawFd;
use std::time::{Duration, Instant};

use consoled::client::{PendingClient, SessionMode};
use consoled::config::{default_telnet, ServerConfig};
use consoled::Multiplexer;

fn pump_until(mux: &mut Multiplexer, mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        mux.run_once();
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

/// A fresh TCP connection whose accepted end is handed to the daemon as
/// a client object; the other end is the test's view of what the
/// operator would see.
fn client_pair() -> (TcpStream, std::os::unix::io::RawFd) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let operator_side = TcpStream::connect(addr).unwrap();
    let (core_side, _) = listener.accept().unwrap();
    (operator_side, core_side.into_raw_fd())
}

fn unique_path(name: &str) -> String {
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}/consoled-test-{pid}-{nanos}-{name}", std::env::temp_dir().display())
}

#[test]
fn console_output_reaches_an_attached_monitor_client_and_its_logfile() {
    let stub = TcpListener::bind("127.0.0.1:0").unwrap();
    let stub_addr = stub.local_addr().unwrap();
    let log_path = unique_path("alpha.log");

    let mut config = ServerConfig::default();
    config.listen_port = 0;
    let mut console = default_telnet("alpha", &stub_addr.ip().to_string(), stub_addr.port());
    console.logfile = Some(log_path.clone());
    config.consoles.push(console);

    let mut mux = Multiplexer::new(config, |_fd, _queue| {}).expect("multiplexer should start");

    // Let the daemon's non-blocking connect land, then accept it on the
    // stub's side to play the role of the console hardware.
    let (mut console_side, _) = pump_and_accept(&mut mux, &stub);

    let (mut operator_side, client_fd) = client_pair();
    mux.attach_queue().push(PendingClient {
        name: "watcher".into(),
        fd: client_fd,
        mode: SessionMode::Monitor,
        write_privileged: false,
        console_names: vec!["alpha".into()],
    });
    mux.run_once(); // drains the attach queue (§4.8 step 2)

    console_side.write_all(b"hello\n").unwrap();

    let mut received = Vec::new();
    let saw_it = pump_until(
        &mut mux,
        || {
            let mut buf = [0u8; 64];
            operator_side.set_nonblocking(true).unwrap();
            if let Ok(n) = operator_side.read(&mut buf) {
                received.extend_from_slice(&buf[..n]);
            }
            received.windows(6).any(|w| w == b"hello\n")
        },
        Duration::from_secs(3),
    );
    assert!(saw_it, "monitor client never saw console output, got {received:?}");

    let logged = std::fs::read(&log_path).unwrap_or_default();
    assert!(
        logged.windows(6).any(|w| w == b"hello\n"),
        "logfile did not capture console traffic: {logged:?}"
    );
    let _ = std::fs::remove_file(&log_path);
}

#[test]
fn monitor_client_cannot_write_to_its_console() {
    let stub = TcpListener::bind("127.0.0.1:0").unwrap();
    let stub_addr = stub.local_addr().unwrap();

    let mut config = ServerConfig::default();
    config.listen_port = 0;
    config.consoles.push(default_telnet("alpha", &stub_addr.ip().to_string(), stub_addr.port()));

    let mut mux = Multiplexer::new(config, |_fd, _queue| {}).expect("multiplexer should start");
    let (mut console_side, _) = pump_and_accept(&mut mux, &stub);

    let (mut operator_side, client_fd) = client_pair();
    mux.attach_queue().push(PendingClient {
        name: "watcher".into(),
        fd: client_fd,
        mode: SessionMode::Monitor,
        write_privileged: false,
        console_names: vec!["alpha".into()],
    });
    mux.run_once();

    operator_side.write_all(b"should not reach the console\n").unwrap();

    let mut saw_bytes = false;
    pump_until(
        &mut mux,
        || {
            let mut buf = [0u8; 64];
            console_side.set_nonblocking(true).unwrap();
            if let Ok(n) = console_side.read(&mut buf) {
                saw_bytes = saw_bytes || n > 0;
            }
            false
        },
        Duration::from_millis(500),
    );
    assert!(!saw_bytes, "a read-only monitor client's bytes reached the console");
}

#[test]
fn sighup_reopens_logfile_at_the_same_path_after_an_external_rename() {
    let stub = TcpListener::bind("127.0.0.1:0").unwrap();
    let stub_addr = stub.local_addr().unwrap();
    let log_path = unique_path("rotate.log");
    let renamed_path = format!("{log_path}.rotated");

    let mut config = ServerConfig::default();
    config.listen_port = 0;
    let mut console = default_telnet("alpha", &stub_addr.ip().to_string(), stub_addr.port());
    console.logfile = Some(log_path.clone());
    config.consoles.push(console);

    let mut mux = Multiplexer::new(config, |_fd, _queue| {}).expect("multiplexer should start");
    let (mut console_side, _) = pump_and_accept(&mut mux, &stub);

    console_side.write_all(b"before rotation\n").unwrap();
    pump_until(
        &mut mux,
        || std::fs::read(&log_path).map(|b| !b.is_empty()).unwrap_or(false),
        Duration::from_secs(3),
    );

    std::fs::rename(&log_path, &renamed_path).unwrap();

    consoled::signals::install();
    unsafe { libc::raise(libc::SIGHUP) };
    mux.run_once(); // step 1 observes the reconfig flag and reopens logfiles

    console_side.write_all(b"after rotation\n").unwrap();
    pump_until(
        &mut mux,
        || std::fs::read(&log_path).map(|b| b.windows(14).any(|w| w == b"after rotation")).unwrap_or(false),
        Duration::from_secs(3),
    );

    let original_path_contents = std::fs::read(&log_path).unwrap();
    assert!(original_path_contents.windows(14).any(|w| w == b"after rotation"));
    assert!(!original_path_contents.windows(15).any(|w| w == b"before rotation"));

    let renamed_contents = std::fs::read(&renamed_path).unwrap();
    assert!(renamed_contents.windows(15).any(|w| w == b"before rotation"));

    let _ = std::fs::remove_file(&log_path);
    let _ = std::fs::remove_file(&renamed_path);
}

/// Runs iterations until the stub listener has a pending connection
/// (the daemon's non-blocking telnet connect landed), then accepts it.
fn pump_and_accept(mux: &mut Multiplexer, stub: &TcpListener) -> (TcpStream, std::net::SocketAddr) {
    stub.set_nonblocking(true).unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        mux.run_once();
        if let Ok((stream, addr)) = stub.accept() {
            stream.set_nonblocking(false).unwrap();
            return (stream, addr);
        }
        assert!(Instant::now() < deadline, "stub console never saw a connection");
        std::thread::sleep(Duration::from_millis(20));
    }
}
