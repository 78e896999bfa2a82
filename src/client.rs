//! Client session object (§4.7): wiring an accepted, already-greeted
//! socket into the event loop, and handling operator escape commands.

use crate::escape::EscapeParser;
use crate::object::ObjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Read-only: receives console output, cannot write.
    Monitor,
    /// Exclusive write access to its attached console(s).
    Interactive,
    /// Writes fan out to every attached console.
    Broadcast,
}

pub struct ClientState {
    pub greeting_complete: bool,
    pub suspended: bool,
    pub write_privileged: bool,
    pub mode: SessionMode,
    pub consoles: Vec<ObjectId>,
    pub escape: EscapeParser,
}

impl ClientState {
    pub fn new(mode: SessionMode, write_privileged: bool) -> ClientState {
        ClientState {
            greeting_complete: true, // the external worker only hands off post-greeting clients (§4.7)
            suspended: false,
            write_privileged,
            mode,
            consoles: Vec::new(),
            escape: EscapeParser::default(),
        }
    }

    pub fn can_write(&self) -> bool {
        self.write_privileged && matches!(self.mode, SessionMode::Interactive | SessionMode::Broadcast)
    }
}

/// A fully-greeted client handed off by the external session worker,
/// ready for the event loop to attach (§4.7, §5).
pub struct PendingClient {
    pub name: String,
    pub fd: std::os::unix::io::RawFd,
    pub mode: SessionMode,
    pub write_privileged: bool,
    /// Consoles this client should be attached to by name, resolved
    /// against the master list at attach time.
    pub console_names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_clients_cannot_write_even_if_privileged() {
        let c = ClientState::new(SessionMode::Monitor, true);
        assert!(!c.can_write());
    }

    #[test]
    fn interactive_requires_privilege() {
        let privileged = ClientState::new(SessionMode::Interactive, true);
        let unprivileged = ClientState::new(SessionMode::Interactive, false);
        assert!(privileged.can_write());
        assert!(!unprivileged.can_write());
    }
}
