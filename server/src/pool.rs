//! Type-keyed entity pool with partitioned id allocation.
//!
//! Renting always yields a freshly allocated unique id, even when the
//! backing instance is recycled, so a stale client can never confuse two
//! tenants of the same slot. Returned instances are reset to defaults and
//! retained up to the pool capacity; the pool is an allocation optimization
//! only and never holds an instance that is still live in a map.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::entity::{Character, CHARACTER_ID_START, MONSTER_ID_START};
use crate::monster::Monster;

/// Default number of instances retained per type.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Concurrent-safe pool over characters and monsters.
pub struct ObjectPool {
    next_character_id: AtomicU32,
    next_monster_id: AtomicU32,
    characters: Mutex<Vec<Character>>,
    monsters: Mutex<Vec<Monster>>,
    capacity: usize,
}

impl ObjectPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            next_character_id: AtomicU32::new(CHARACTER_ID_START),
            next_monster_id: AtomicU32::new(MONSTER_ID_START),
            characters: Mutex::new(Vec::new()),
            monsters: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Rents a character initialized at the given position with a fresh id.
    pub fn rent_character(&self, session_id: &str, x: f32, y: f32, z: f32) -> Character {
        let id = self.next_character_id.fetch_add(1, Ordering::Relaxed);
        match self.characters.lock().expect("pool lock poisoned").pop() {
            Some(mut c) => {
                c.id = id;
                c.x = x;
                c.y = y;
                c.z = z;
                c.session_id = session_id.to_string();
                c.active = true;
                c
            }
            None => Character::new(id, session_id, x, y, z),
        }
    }

    /// Rents a monster initialized at the given position with a fresh id.
    /// Callers adjust combat stats afterwards from the spawn descriptor.
    pub fn rent_monster(&self, x: f32, y: f32, z: f32) -> Monster {
        let id = self.next_monster_id.fetch_add(1, Ordering::Relaxed);
        match self.monsters.lock().expect("pool lock poisoned").pop() {
            Some(mut m) => {
                m.id = id;
                m.x = x;
                m.y = y;
                m.z = z;
                m.spawn_anchor = (x, y, z);
                m.active = true;
                m
            }
            None => Monster::new(id, x, y, z),
        }
    }

    /// Returns a character to the pool, resetting it first. Instances
    /// beyond capacity are simply dropped.
    pub fn return_character(&self, mut character: Character) {
        character.reset();
        let mut pool = self.characters.lock().expect("pool lock poisoned");
        if pool.len() < self.capacity {
            pool.push(character);
        }
    }

    /// Returns a monster to the pool, resetting it first.
    pub fn return_monster(&self, mut monster: Monster) {
        monster.reset();
        let mut pool = self.monsters.lock().expect("pool lock poisoned");
        if pool.len() < self.capacity {
            pool.push(monster);
        }
    }

    /// Instances currently idle in the pool, per type.
    pub fn idle_counts(&self) -> (usize, usize) {
        (
            self.characters.lock().expect("pool lock poisoned").len(),
            self.monsters.lock().expect("pool lock poisoned").len(),
        )
    }
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}
