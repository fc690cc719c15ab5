//! World entities: the shared contract and the player-controlled character.
//!
//! Entities are a tagged sum ([`GameObject`]) rather than a trait-object
//! hierarchy: broadcast code matches on the variant and never downcasts.
//! Object id spaces are partitioned by range so an id alone reveals the
//! kind: characters count up from 1, monsters from 10 000.

use shared::ObjectKind;

use crate::monster::Monster;

/// First id handed to a character.
pub const CHARACTER_ID_START: u32 = 1;
/// First id handed to a monster.
pub const MONSTER_ID_START: u32 = 10_000;

/// Default character movement speed in world units per second.
pub const CHARACTER_MOVE_SPEED: f32 = 5.0;
/// Distance below which a mover is considered to have arrived.
pub const ARRIVE_EPSILON: f32 = 0.05;

/// Infers the entity kind from its id range alone.
pub fn kind_of_id(id: u32) -> ObjectKind {
    if id >= MONSTER_ID_START {
        ObjectKind::Monster
    } else {
        ObjectKind::Character
    }
}

/// A player avatar.
///
/// Created when a session starts a game, retained across a temporary
/// disconnect for the reconnection grace window, destroyed when that window
/// expires or the map is torn down. Handlers only write the move target;
/// the tick loop integrates the actual motion.
#[derive(Debug, Clone)]
pub struct Character {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub move_speed: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub level: i32,
    pub move_target: Option<(f32, f32, f32)>,
    /// Session currently controlling this character.
    pub session_id: String,
    pub active: bool,
}

impl Character {
    pub fn new(id: u32, session_id: &str, x: f32, y: f32, z: f32) -> Self {
        Self {
            id,
            x,
            y,
            z,
            move_speed: CHARACTER_MOVE_SPEED,
            hp: 100,
            max_hp: 100,
            level: 1,
            move_target: None,
            session_id: session_id.to_string(),
            active: true,
        }
    }

    pub fn position(&self) -> (f32, f32, f32) {
        (self.x, self.y, self.z)
    }

    /// Integrates one tick of movement toward the move target. Returns
    /// whether the position changed.
    pub fn update(&mut self, dt: f32) -> bool {
        let Some((tx, ty, tz)) = self.move_target else {
            return false;
        };
        let dx = tx - self.x;
        let dy = ty - self.y;
        let dz = tz - self.z;
        let dist = (dx * dx + dy * dy + dz * dz).sqrt();
        let step = self.move_speed * dt;

        if dist <= step || dist < ARRIVE_EPSILON {
            self.x = tx;
            self.y = ty;
            self.z = tz;
            self.move_target = None;
        } else {
            self.x += dx / dist * step;
            self.y += dy / dist * step;
            self.z += dz / dist * step;
        }
        true
    }

    /// Resets every field to defaults so the instance can be pooled.
    pub fn reset(&mut self) {
        self.id = 0;
        self.x = 0.0;
        self.y = 0.0;
        self.z = 0.0;
        self.move_speed = CHARACTER_MOVE_SPEED;
        self.hp = 100;
        self.max_hp = 100;
        self.level = 1;
        self.move_target = None;
        self.session_id.clear();
        self.active = false;
    }
}

/// Tagged sum over everything a map can hold.
#[derive(Debug, Clone)]
pub enum GameObject {
    Character(Character),
    Monster(Monster),
}

impl GameObject {
    pub fn id(&self) -> u32 {
        match self {
            GameObject::Character(c) => c.id,
            GameObject::Monster(m) => m.id,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            GameObject::Character(_) => ObjectKind::Character,
            GameObject::Monster(_) => ObjectKind::Monster,
        }
    }

    pub fn position(&self) -> (f32, f32, f32) {
        match self {
            GameObject::Character(c) => c.position(),
            GameObject::Monster(m) => m.position(),
        }
    }

    pub fn active(&self) -> bool {
        match self {
            GameObject::Character(c) => c.active,
            GameObject::Monster(m) => m.active,
        }
    }

    pub fn hp(&self) -> i32 {
        match self {
            GameObject::Character(c) => c.hp,
            GameObject::Monster(m) => m.hp,
        }
    }

    pub fn max_hp(&self) -> i32 {
        match self {
            GameObject::Character(c) => c.max_hp,
            GameObject::Monster(m) => m.max_hp,
        }
    }

    pub fn level(&self) -> i32 {
        match self {
            GameObject::Character(c) => c.level,
            GameObject::Monster(m) => m.level,
        }
    }
}
