//! Programmatic construction of event logs.
//!
//! Assigns consecutive global ids and interns location signatures into a
//! [`Metadata`] table, so scenarios read like the program that produced them:
//!
//! ```
//! use sleuth_trace::builder::EventLogBuilder;
//!
//! let mut log = EventLogBuilder::new();
//! log.write(1, "Counter.inc:3", 100, 1)
//!     .write(2, "Counter.inc:3", 100, 2);
//! let (events, metadata) = log.into_parts();
//! assert_eq!(events.len(), 2);
//! assert_eq!(metadata.locations.len(), 1);
//! ```

use crate::event::{DataAddress, Event, EventKind, LockMode, SyncObject, ThreadId};
use crate::metadata::Metadata;

#[derive(Debug, Clone)]
pub struct EventLogBuilder {
    events: Vec<Event>,
    metadata: Metadata,
    next_gid: u64,
}

impl Default for EventLogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLogBuilder {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            metadata: Metadata::new(),
            next_gid: 1,
        }
    }

    pub fn event(&mut self, thread: u64, location: &str, kind: EventKind) -> &mut Self {
        let location = self.metadata.intern_location(location);
        self.events
            .push(Event::new(self.next_gid, ThreadId(thread), location, kind));
        self.next_gid += 1;
        self
    }

    pub fn init(&mut self, thread: u64, location: &str, object: u64, value: i64) -> &mut Self {
        let address = DataAddress::new(object, 0);
        self.event(thread, location, EventKind::Init { address, value })
    }

    pub fn read(&mut self, thread: u64, location: &str, object: u64, value: i64) -> &mut Self {
        self.read_at(thread, location, DataAddress::new(object, 0), value)
    }

    pub fn read_at(
        &mut self,
        thread: u64,
        location: &str,
        address: DataAddress,
        value: i64,
    ) -> &mut Self {
        self.event(thread, location, EventKind::Read { address, value })
    }

    pub fn write(&mut self, thread: u64, location: &str, object: u64, value: i64) -> &mut Self {
        self.write_at(thread, location, DataAddress::new(object, 0), value)
    }

    pub fn write_at(
        &mut self,
        thread: u64,
        location: &str,
        address: DataAddress,
        value: i64,
    ) -> &mut Self {
        self.event(thread, location, EventKind::Write { address, value })
    }

    pub fn lock(&mut self, thread: u64, location: &str, lock: u64) -> &mut Self {
        self.event(
            thread,
            location,
            EventKind::Lock {
                lock: SyncObject(lock),
                mode: LockMode::Exclusive,
            },
        )
    }

    pub fn unlock(&mut self, thread: u64, location: &str, lock: u64) -> &mut Self {
        self.event(
            thread,
            location,
            EventKind::Unlock {
                lock: SyncObject(lock),
                mode: LockMode::Exclusive,
            },
        )
    }

    pub fn lock_shared(&mut self, thread: u64, location: &str, lock: u64) -> &mut Self {
        self.event(
            thread,
            location,
            EventKind::Lock {
                lock: SyncObject(lock),
                mode: LockMode::Shared,
            },
        )
    }

    pub fn unlock_shared(&mut self, thread: u64, location: &str, lock: u64) -> &mut Self {
        self.event(
            thread,
            location,
            EventKind::Unlock {
                lock: SyncObject(lock),
                mode: LockMode::Shared,
            },
        )
    }

    pub fn wait(&mut self, thread: u64, location: &str, lock: u64) -> &mut Self {
        self.event(thread, location, EventKind::Wait { lock: SyncObject(lock) })
    }

    pub fn notify(&mut self, thread: u64, location: &str, lock: u64) -> &mut Self {
        self.event(thread, location, EventKind::Notify { lock: SyncObject(lock) })
    }

    pub fn start(&mut self, thread: u64, location: &str, child: u64) -> &mut Self {
        self.event(thread, location, EventKind::Start { child: ThreadId(child) })
    }

    pub fn join(&mut self, thread: u64, location: &str, child: u64) -> &mut Self {
        self.event(thread, location, EventKind::Join { child: ThreadId(child) })
    }

    pub fn branch(&mut self, thread: u64, location: &str) -> &mut Self {
        self.event(thread, location, EventKind::Branch)
    }

    pub fn name_thread(&mut self, thread: u64, name: &str) -> &mut Self {
        self.metadata.name_thread(ThreadId(thread), name);
        self
    }

    pub fn mark_volatile(&mut self, object: u64) -> &mut Self {
        self.metadata.mark_volatile(DataAddress::new(object, 0));
        self
    }

    /// Drain the events logged so far; later events keep counting gids.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn into_parts(self) -> (Vec<Event>, Metadata) {
        (self.events, self.metadata)
    }
}
