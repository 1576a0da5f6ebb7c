//! Domain identifiers (strongly-typed IDs).
//!
//! Every opaque id in the system is a ULID wrapped in `Id<T>`, where `T` is a
//! zero-sized marker. Task ids, notification ids and correlation ids share one
//! implementation but cannot be mixed up at compile time.
//!
//! ULIDs sort by creation time, which keeps logs and snapshots readable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait providing the display prefix of an id family.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
///
/// ```ignore
/// let task: TaskId = Id::from(Ulid::new());
/// let note: NotificationId = Id::from(Ulid::new());
/// // task and note are different types
/// ```
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id from the system clock. Prefer `IdGenerator` in code that
    /// needs deterministic timestamps.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Notification {}

impl IdMarker for Notification {
    fn prefix() -> &'static str {
        "note-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Correlation {}

impl IdMarker for Correlation {
    fn prefix() -> &'static str {
        "req-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Session {}

impl IdMarker for Session {
    fn prefix() -> &'static str {
        "session-"
    }
}

// ========================================
// Aliases
// ========================================

/// Identifier of a Task (one prompt within a batch).
pub type TaskId = Id<Task>;

/// Identifier of a Notification; consumers deduplicate on it.
pub type NotificationId = Id<Notification>;

/// Identifier that pairs a relayed UI command with its direct response.
pub type CorrelationId = Id<Correlation>;

/// Identifier of a history session.
pub type SessionId = Id<Session>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid1 = Ulid::new();
        let ulid2 = Ulid::new();
        let ulid3 = Ulid::new();

        let task = TaskId::from_ulid(ulid1);
        let note = NotificationId::from_ulid(ulid2);
        let req = CorrelationId::from_ulid(ulid3);

        assert_eq!(task.as_ulid(), ulid1);
        assert_eq!(note.as_ulid(), ulid2);
        assert_eq!(req.as_ulid(), ulid3);

        assert!(task.to_string().starts_with("task-"));
        assert!(note.to_string().starts_with("note-"));
        assert!(req.to_string().starts_with("req-"));
        assert!(SessionId::generate().to_string().starts_with("session-"));

        // let _: TaskId = note; // <- does not compile
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = TaskId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }

    #[test]
    fn ids_survive_json() {
        let id = NotificationId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let back: NotificationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<Ulid>());
        assert_eq!(size_of::<CorrelationId>(), 16);
    }
}
