//! `consoled` — the single-threaded event-loop core of a remote console
//! management daemon: it multiplexes client sessions and console
//! endpoints (serial, telnet), journals console traffic to per-console
//! logfiles, and runs reset subprocesses under a watchdog.
//!
//! Configuration-file parsing, daemonization, the client-protocol
//! greeting, and the syslog sink are external collaborators — this crate
//! only defines the interfaces it consumes from them (`config`,
//! `handoff`) and drives everything else itself.

pub mod client;
pub mod config;
pub mod error;
pub mod escape;
pub mod eventloop;
pub mod handoff;
pub mod listener;
pub mod logfile;
pub mod object;
pub mod poll;
pub mod reset;
pub mod ring;
pub mod serial;
pub mod signals;
pub mod telnet;
pub mod timer;

pub use error::{ConsoledError, Result};
pub use eventloop::Multiplexer;
