//! Last-broadcast snapshots and field-level delta computation.
//!
//! A client's view of an entity is stable across a tick when no broadcast
//! field changed, so empty deltas are elided by the caller. The tracker
//! remembers what was last sent per entity and reports which of
//! {position, HP, level} differ now.

use std::collections::HashMap;
use std::sync::Mutex;

use shared::protocol::{UPDATE_HP, UPDATE_LEVEL, UPDATE_POSITION};

/// Broadcast-relevant fields of an entity at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedState {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub hp: i32,
    pub level: i32,
}

/// Outcome of a delta computation.
#[derive(Debug, Clone, Copy)]
pub struct Delta {
    /// Bitmask over [`UPDATE_POSITION`], [`UPDATE_HP`], [`UPDATE_LEVEL`].
    pub flags: u8,
    /// Current values (what the snapshot now holds).
    pub current: TrackedState,
    /// Values before this call; equals `current` on the first call.
    pub previous: TrackedState,
}

impl Delta {
    pub fn position_changed(&self) -> bool {
        self.flags & UPDATE_POSITION != 0
    }

    pub fn is_empty(&self) -> bool {
        self.flags == 0
    }
}

/// Per-entity snapshot store.
#[derive(Debug, Default)]
pub struct StateTracker {
    snapshots: Mutex<HashMap<u32, TrackedState>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `current` against the stored snapshot, rewrites the
    /// snapshot when anything changed, and reports the changed fields.
    /// The first call for an id stores the snapshot and reports every
    /// field as changed.
    pub fn delta(&self, id: u32, current: TrackedState) -> Delta {
        let mut snapshots = self.snapshots.lock().expect("tracker lock poisoned");
        match snapshots.get_mut(&id) {
            Some(prev) => {
                let previous = *prev;
                let mut flags = 0u8;
                if current.x != previous.x || current.y != previous.y || current.z != previous.z {
                    flags |= UPDATE_POSITION;
                }
                if current.hp != previous.hp {
                    flags |= UPDATE_HP;
                }
                if current.level != previous.level {
                    flags |= UPDATE_LEVEL;
                }
                if flags != 0 {
                    *prev = current;
                }
                Delta {
                    flags,
                    current,
                    previous,
                }
            }
            None => {
                snapshots.insert(id, current);
                Delta {
                    flags: UPDATE_POSITION | UPDATE_HP | UPDATE_LEVEL,
                    current,
                    previous: current,
                }
            }
        }
    }

    /// Forgets an entity's snapshot.
    pub fn remove(&self, id: u32) {
        self.snapshots
            .lock()
            .expect("tracker lock poisoned")
            .remove(&id);
    }
}
