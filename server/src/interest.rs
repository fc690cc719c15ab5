//! Area-of-interest bookkeeping: which sessions care about which objects.
//!
//! Each connected session with an avatar owns one spherical interest area.
//! The manager also keeps the reverse index (object id to interested
//! session set) so a broadcast never has to rescan the world. Resolution
//! iterates the area table, which has at most one entry per connected
//! client; it never consults the spatial grid.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// A session's sphere of visibility, centered on its avatar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterestArea {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub radius: f32,
}

impl InterestArea {
    /// Whether a world position falls inside this area.
    pub fn contains(&self, x: f32, y: f32, z: f32) -> bool {
        let dx = self.x - x;
        let dy = self.y - y;
        let dz = self.z - z;
        dx * dx + dy * dy + dz * dz <= self.radius * self.radius
    }
}

#[derive(Debug, Default)]
struct InterestInner {
    areas: HashMap<String, InterestArea>,
    /// Object id -> sessions whose area covered it at last resolution.
    watchers: HashMap<u32, HashSet<String>>,
}

/// Internally synchronized interest manager.
#[derive(Debug, Default)]
pub struct InterestManager {
    inner: RwLock<InterestInner>,
}

impl InterestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces a session's interest area.
    pub fn set_area(&self, session_id: &str, x: f32, y: f32, z: f32, radius: f32) {
        let mut inner = self.inner.write().expect("interest lock poisoned");
        inner
            .areas
            .insert(session_id.to_string(), InterestArea { x, y, z, radius });
    }

    /// Drops a session's area and erases it from every reverse entry.
    pub fn remove_area(&self, session_id: &str) {
        let mut inner = self.inner.write().expect("interest lock poisoned");
        inner.areas.remove(session_id);
        for watchers in inner.watchers.values_mut() {
            watchers.remove(session_id);
        }
    }

    /// The area currently installed for a session.
    pub fn area_of(&self, session_id: &str) -> Option<InterestArea> {
        self.inner
            .read()
            .expect("interest lock poisoned")
            .areas
            .get(session_id)
            .copied()
    }

    /// Computes and stores the audience for an object appearing at a
    /// position; returns the interested session ids.
    pub fn resolve_on_spawn(&self, id: u32, x: f32, y: f32, z: f32) -> HashSet<String> {
        let mut inner = self.inner.write().expect("interest lock poisoned");
        let audience: HashSet<String> = inner
            .areas
            .iter()
            .filter(|(_, area)| area.contains(x, y, z))
            .map(|(sid, _)| sid.clone())
            .collect();
        inner.watchers.insert(id, audience.clone());
        audience
    }

    /// Audience for an object that moved: every session that saw the old
    /// position or sees the new one, so clients losing sight still get a
    /// final frame. The reverse index is rewritten to the new-position set;
    /// whether to follow up with a despawn is the caller's decision.
    pub fn resolve_on_move(
        &self,
        id: u32,
        old: (f32, f32, f32),
        new: (f32, f32, f32),
    ) -> HashSet<String> {
        let mut inner = self.inner.write().expect("interest lock poisoned");
        let mut union = HashSet::new();
        let mut current = HashSet::new();
        for (sid, area) in &inner.areas {
            let sees_old = area.contains(old.0, old.1, old.2);
            let sees_new = area.contains(new.0, new.1, new.2);
            if sees_new {
                current.insert(sid.clone());
            }
            if sees_old || sees_new {
                union.insert(sid.clone());
            }
        }
        inner.watchers.insert(id, current);
        union
    }

    /// Drops the reverse entry for a vanished object and returns who was
    /// watching it.
    pub fn resolve_on_despawn(&self, id: u32) -> HashSet<String> {
        self.inner
            .write()
            .expect("interest lock poisoned")
            .watchers
            .remove(&id)
            .unwrap_or_default()
    }

    /// Current reverse-index entry for an object, without recomputing it.
    pub fn watchers_of(&self, id: u32) -> HashSet<String> {
        self.inner
            .read()
            .expect("interest lock poisoned")
            .watchers
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of installed areas (one per in-world session).
    pub fn area_count(&self) -> usize {
        self.inner.read().expect("interest lock poisoned").areas.len()
    }
}
