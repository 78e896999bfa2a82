//! The object model (§3): the master list of consoles, logfiles, and
//! client sessions, plus the shared buffering operations every variant is
//! driven through (`write_obj_data`, `read_from_obj`, `write_to_obj`).

use std::os::unix::io::RawFd;

use log::{trace, warn};

use crate::client::ClientState;
use crate::logfile::LogfileState;
use crate::ring::{RingBuf, DEFAULT_CAPACITY};
use crate::serial::SerialState;
use crate::telnet::TelnetState;

/// Index into the master object table. Stable for the lifetime of the
/// object (slots are recycled but an id is never reused while its
/// original object is still `Some`).
pub type ObjectId = usize;

/// Consecutive ring-buffer overflows before a reader is detached (§4.3).
pub const DEFAULT_OVERFLOW_LIMIT: u32 = 5;

pub enum ObjectKind {
    Serial(SerialState),
    Telnet(TelnetState),
    Logfile(LogfileState),
    Client(ClientState),
}

impl ObjectKind {
    pub fn is_console(&self) -> bool {
        matches!(self, ObjectKind::Serial(_) | ObjectKind::Telnet(_))
    }

    pub fn is_client(&self) -> bool {
        matches!(self, ObjectKind::Client(_))
    }

    pub fn is_logfile(&self) -> bool {
        matches!(self, ObjectKind::Logfile(_))
    }

    pub fn is_telnet(&self) -> bool {
        matches!(self, ObjectKind::Telnet(_))
    }
}

/// An outcome from servicing an object this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Object is still live (or reconnecting); keep it in the master list.
    Keep,
    /// Object is finished — EOF with an empty buffer and no reconnect
    /// left to attempt, or a fatal error. Remove it (§4.3 "read_from_obj").
    Remove,
}

pub struct Object {
    pub name: String,
    /// Negative when detached/closed (invariant 1).
    pub fd: RawFd,
    pub buf: RingBuf,
    pub eof: bool,
    pub reset_requested: bool,
    pub readers: Vec<ObjectId>,
    pub writers: Vec<ObjectId>,
    pub kind: ObjectKind,
    /// Consecutive ring-buffer overflow events for this object as a
    /// *reader*; reset to 0 on any successful, non-truncated delivery.
    pub overflow_count: u32,
}

impl Object {
    pub fn new(name: impl Into<String>, fd: RawFd, kind: ObjectKind) -> Object {
        Object {
            name: name.into(),
            fd,
            buf: RingBuf::new(DEFAULT_CAPACITY),
            eof: false,
            reset_requested: false,
            readers: Vec::new(),
            writers: Vec::new(),
            kind,
            overflow_count: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.fd >= 0
    }
}

/// The master list (§3 "Lifecycle"). A slab of slots so `ObjectId`s stay
/// stable across insert/remove, mirroring the teacher's token-indexed
/// registries (`mio::Token` into a slab of sources) but safely: no raw
/// pointer arithmetic, just a `Vec<Option<Object>>` plus a free list.
#[derive(Default)]
pub struct ObjectTable {
    slots: Vec<Option<Object>>,
    free: Vec<ObjectId>,
}

impl ObjectTable {
    pub fn new() -> ObjectTable {
        ObjectTable::default()
    }

    pub fn insert(&mut self, obj: Object) -> ObjectId {
        if let Some(id) = self.free.pop() {
            self.slots[id] = Some(obj);
            id
        } else {
            self.slots.push(Some(obj));
            self.slots.len() - 1
        }
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<Object> {
        let obj = self.slots.get_mut(id)?.take();
        if obj.is_some() {
            self.free.push(id);
            // Clear non-owning back-references held by any surviving object.
            for slot in self.slots.iter_mut().flatten() {
                slot.readers.retain(|&r| r != id);
                slot.writers.retain(|&w| w != id);
            }
        }
        obj
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.slots.get(id)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.slots.get_mut(id)?.as_mut()
    }

    /// Master-list order, skipping recycled slots — used for deterministic
    /// cleanup (§9) and interest-set computation (§4.8).
    pub fn ids(&self) -> Vec<ObjectId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().map(|_| i))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|o| o.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Appends `bytes` to `dest`'s ring buffer, doubling `IAC` (0xFF) when the
/// destination is a telnet console in the UP state and `is_telnet_literal`
/// is false (§4.3). Returns the number of *source* bytes accepted (not
/// counting doubled escape bytes), truncating with a logged warning if the
/// ring is full, per invariant 4: nothing is silently dropped.
pub fn write_obj_data(
    table: &mut ObjectTable,
    dest: ObjectId,
    bytes: &[u8],
    is_telnet_literal: bool,
) -> usize {
    let needs_iac_doubling = table
        .get(dest)
        .map(|o| !is_telnet_literal && matches!(&o.kind, ObjectKind::Telnet(t) if t.is_up()))
        .unwrap_or(false);

    let Some(obj) = table.get_mut(dest) else { return 0 };

    let mut accepted = 0usize;
    let mut truncated = false;
    for &b in bytes {
        if needs_iac_doubling && b == crate::telnet::IAC {
            if obj.buf.free_space() < 2 {
                truncated = true;
                break;
            }
            obj.buf.push(&[b, b]);
        } else {
            if obj.buf.free_space() < 1 {
                truncated = true;
                break;
            }
            obj.buf.push(&[b]);
        }
        accepted += 1;
    }

    if truncated {
        obj.overflow_count += 1;
        warn!(
            "buffer full for [{}]; dropping remaining bytes ({} consecutive overflow{})",
            obj.name,
            obj.overflow_count,
            if obj.overflow_count == 1 { "" } else { "s" }
        );
    } else if accepted > 0 {
        obj.overflow_count = 0;
    }
    accepted
}

/// Whether `reader` should be detached from its producers after this
/// delivery, per the overflow-budget policy (§4.3).
pub fn exceeded_overflow_budget(table: &ObjectTable, reader: ObjectId, limit: u32) -> bool {
    table.get(reader).map(|o| o.overflow_count >= limit).unwrap_or(false)
}

/// Detaches `reader` from every object that currently lists it as a
/// reader, used once `exceeded_overflow_budget` fires.
pub fn detach_reader(table: &mut ObjectTable, reader: ObjectId) {
    for id in table.ids() {
        if let Some(obj) = table.get_mut(id) {
            obj.readers.retain(|&r| r != reader);
        }
    }
    trace!("detached reader id={reader} after exceeding overflow budget");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientState, SessionMode};

    fn dummy_client() -> Object {
        Object::new(
            "client-1",
            3,
            ObjectKind::Client(ClientState::new(SessionMode::Monitor, false)),
        )
    }

    #[test]
    fn insert_remove_recycles_ids_and_clears_backrefs() {
        let mut t = ObjectTable::new();
        let a = t.insert(dummy_client());
        let b = t.insert(dummy_client());
        t.get_mut(a).unwrap().readers.push(b);
        t.remove(b);
        assert!(t.get(a).unwrap().readers.is_empty());
        let c = t.insert(dummy_client());
        assert_eq!(c, b, "freed slot should be recycled");
    }

    #[test]
    fn write_obj_data_truncates_and_counts_overflow() {
        let mut t = ObjectTable::new();
        let mut obj = dummy_client();
        obj.buf = RingBuf::new(4);
        let id = t.insert(obj);
        let accepted = write_obj_data(&mut t, id, b"abcdef", false);
        assert_eq!(accepted, 4);
        assert_eq!(t.get(id).unwrap().overflow_count, 1);
    }
}
