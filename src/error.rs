//! Crate-level error type.
//!
//! Most of the failure modes described in the design (transient I/O,
//! endpoint-down, resource exhaustion) are handled in place by the event
//! loop and never escape as a `Result`. This type only covers the *fatal*
//! class: conditions discovered at startup that leave the daemon unable
//! to run at all.

use std::io;

/// Fatal startup/config errors. Per-object failures (a telnet console
/// dropping, a logfile write failing) are handled in place by the event
/// loop and do not produce a `ConsoledError`.
#[derive(thiserror::Error, Debug)]
pub enum ConsoledError {
    #[error("unable to bind listening socket on port {port}: {source}")]
    Bind { port: u16, #[source] source: io::Error },

    #[error("unable to create readiness poller: {0}")]
    Poller(#[source] io::Error),

    #[error("configuration \"{name}\" has no consoles defined")]
    NoConsoles { name: String },

    #[error("console [{name}] has an invalid configuration: {reason}")]
    InvalidConsole { name: String, reason: String },

    #[error("unable to raise the open file descriptor limit: {0}")]
    ResourceLimit(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ConsoledError>;
