//! The attach queue (§4.7, §5): a mutex-guarded hand-off point between the
//! short-lived greeting worker threads and the single event-loop thread
//! that owns all object state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::client::PendingClient;

#[derive(Clone, Default)]
pub struct AttachQueue {
    inner: Arc<Mutex<VecDeque<PendingClient>>>,
}

impl AttachQueue {
    pub fn new() -> AttachQueue {
        AttachQueue::default()
    }

    /// Called by a greeting worker thread once its client has completed
    /// the external greeting/authorization handshake.
    pub fn push(&self, client: PendingClient) {
        self.inner.lock().expect("attach queue poisoned").push_back(client);
    }

    /// Drained by the event loop at the top of each iteration (§4.8 step 2).
    pub fn drain(&self) -> Vec<PendingClient> {
        let mut guard = self.inner.lock().expect("attach queue poisoned");
        guard.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SessionMode;

    #[test]
    fn push_then_drain_preserves_order() {
        let q = AttachQueue::new();
        q.push(PendingClient {
            name: "c1".into(),
            fd: 10,
            mode: SessionMode::Monitor,
            write_privileged: false,
            console_names: vec!["alpha".into()],
        });
        q.push(PendingClient {
            name: "c2".into(),
            fd: 11,
            mode: SessionMode::Interactive,
            write_privileged: true,
            console_names: vec!["alpha".into()],
        });
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].name, "c1");
        assert_eq!(drained[1].name, "c2");
        assert!(q.drain().is_empty());
    }
}
