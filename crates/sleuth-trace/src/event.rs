//! Immutable event records produced by the recorder.
//!
//! An [`Event`] is a single logged action of one thread. The `gid` is the
//! logged global order; it is strictly increasing across the whole trace and
//! restricted to one thread it coincides with that thread's program order.

use std::fmt;

/// Identity of a recorded thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(transparent))]
pub struct ThreadId(pub u64);

/// Interned static program location (the instrumented site).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(transparent))]
pub struct LocationId(pub u32);

/// Identity of a monitor or lock object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(transparent))]
pub struct SyncObject(pub u64);

/// A memory location: object identity plus field or array index.
///
/// Static fields use object `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DataAddress {
    pub object: u64,
    pub index: u64,
}

impl DataAddress {
    pub fn new(object: u64, index: u64) -> Self {
        Self { object, index }
    }
}

impl fmt::Display for DataAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.object == 0 {
            write!(f, ".{}", self.index)
        } else {
            write!(f, "{}.{}", self.object, self.index)
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for SyncObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Lock acquisition mode. Two shared regions never exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
pub enum LockMode {
    #[default]
    Exclusive,
    Shared,
}

impl LockMode {
    pub fn is_exclusive(self) -> bool {
        matches!(self, LockMode::Exclusive)
    }
}

/// What a logged event did.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serialize",
    serde(tag = "type", rename_all = "snake_case")
)]
pub enum EventKind {
    /// Initial value of a location, logged before any access.
    Init { address: DataAddress, value: i64 },
    Read { address: DataAddress, value: i64 },
    Write { address: DataAddress, value: i64 },
    Lock {
        lock: SyncObject,
        #[cfg_attr(feature = "serialize", serde(default))]
        mode: LockMode,
    },
    Unlock {
        lock: SyncObject,
        #[cfg_attr(feature = "serialize", serde(default))]
        mode: LockMode,
    },
    /// Releases `lock`, blocks until notified, then reacquires it.
    Wait { lock: SyncObject },
    Notify { lock: SyncObject },
    /// Spawns `child`.
    Start { child: ThreadId },
    /// Blocks until `child` terminates.
    Join { child: ThreadId },
    /// A control-flow decision that may depend on previously read values.
    Branch,
}

/// One logged event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Event {
    pub gid: u64,
    pub thread: ThreadId,
    pub location: LocationId,
    pub kind: EventKind,
}

impl Event {
    pub fn new(gid: u64, thread: ThreadId, location: LocationId, kind: EventKind) -> Self {
        Self {
            gid,
            thread,
            location,
            kind,
        }
    }

    /// Address touched by a memory access (`Init`, `Read`, `Write`).
    pub fn address(&self) -> Option<DataAddress> {
        match self.kind {
            EventKind::Init { address, .. }
            | EventKind::Read { address, .. }
            | EventKind::Write { address, .. } => Some(address),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<i64> {
        match self.kind {
            EventKind::Init { value, .. }
            | EventKind::Read { value, .. }
            | EventKind::Write { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self.kind, EventKind::Read { .. })
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, EventKind::Write { .. })
    }

    /// `Read` or `Write`; `Init` is not an access of the critical trace.
    pub fn is_access(&self) -> bool {
        self.is_read() || self.is_write()
    }

    pub fn is_lock(&self) -> bool {
        matches!(self.kind, EventKind::Lock { .. })
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, EventKind::Start { .. })
    }

    pub fn is_join(&self) -> bool {
        matches!(self.kind, EventKind::Join { .. })
    }

    /// Lock-like synchronization object, if any.
    pub fn lock_object(&self) -> Option<SyncObject> {
        match self.kind {
            EventKind::Lock { lock, .. }
            | EventKind::Unlock { lock, .. }
            | EventKind::Wait { lock }
            | EventKind::Notify { lock } => Some(lock),
            _ => None,
        }
    }

    pub fn is_sync(&self) -> bool {
        self.lock_object().is_some() || self.is_start() || self.is_join()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Init { address, value } => write!(f, "init {address} = {value}"),
            EventKind::Read { address, value } => write!(f, "read {address} -> {value}"),
            EventKind::Write { address, value } => write!(f, "write {address} <- {value}"),
            EventKind::Lock { lock, mode } => match mode {
                LockMode::Exclusive => write!(f, "lock {lock}"),
                LockMode::Shared => write!(f, "lock-shared {lock}"),
            },
            EventKind::Unlock { lock, mode } => match mode {
                LockMode::Exclusive => write!(f, "unlock {lock}"),
                LockMode::Shared => write!(f, "unlock-shared {lock}"),
            },
            EventKind::Wait { lock } => write!(f, "wait {lock}"),
            EventKind::Notify { lock } => write!(f, "notify {lock}"),
            EventKind::Start { child } => write!(f, "start {child}"),
            EventKind::Join { child } => write!(f, "join {child}"),
            EventKind::Branch => write!(f, "branch"),
        }
    }
}
