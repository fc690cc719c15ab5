//! Static map data consumed at startup.
//!
//! Descriptors are produced by external editor tooling as camelCase JSON.
//! When no file is supplied the server falls back to a built-in map with
//! ten monsters along a diagonal.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A point in world space.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn as_tuple(&self) -> (f32, f32, f32) {
        (self.x, self.y, self.z)
    }
}

/// One monster spawn directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterSpawn {
    /// Editor-facing type name; informational for now.
    #[serde(default)]
    pub monster_type: String,
    pub position: Position,
    #[serde(default = "default_count")]
    pub count: u32,
    /// Seconds until a killed monster respawns.
    /// TODO: respawn scheduling is not implemented yet; the field is parsed
    /// and carried so descriptors stay forward-compatible.
    #[serde(default)]
    pub respawn_seconds: f32,
    /// Spawn positions are spread within this radius of `position`.
    #[serde(default)]
    pub spawn_radius: f32,
    pub level: Option<i32>,
    pub hp: Option<i32>,
    pub move_speed: Option<f32>,
    pub detect_range: Option<f32>,
    pub attack_range: Option<f32>,
    #[serde(default = "default_patrol")]
    pub patrol: bool,
    #[serde(default)]
    pub patrol_radius: f32,
}

fn default_count() -> u32 {
    1
}

fn default_patrol() -> bool {
    true
}

/// A decorative or blocking fixture; carried through for clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticObject {
    #[serde(default)]
    pub name: String,
    pub position: Position,
}

/// An impassable region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obstacle {
    pub position: Position,
    #[serde(default)]
    pub radius: f32,
}

/// Complete static description of one map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDescriptor {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub depth: f32,
    #[serde(default)]
    pub spawn_points: Vec<Position>,
    #[serde(default)]
    pub monster_spawns: Vec<MonsterSpawn>,
    #[serde(default)]
    pub static_objects: Vec<StaticObject>,
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
}

impl MapDescriptor {
    /// Loads a descriptor from a JSON file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Built-in fallback map: ten monsters spaced along a diagonal.
    pub fn default_map() -> Self {
        let monster_spawns = (1..=10)
            .map(|i| MonsterSpawn {
                monster_type: "drifter".to_string(),
                position: Position::new(i as f32 * 10.0, 0.0, i as f32 * 10.0),
                count: 1,
                respawn_seconds: 30.0,
                spawn_radius: 0.0,
                level: None,
                hp: None,
                move_speed: None,
                detect_range: None,
                attack_range: None,
                patrol: true,
                patrol_radius: 5.0,
            })
            .collect();

        Self {
            id: 1,
            name: "overworld".to_string(),
            width: 200.0,
            depth: 200.0,
            spawn_points: vec![Position::new(0.0, 0.0, 0.0)],
            monster_spawns,
            static_objects: Vec::new(),
            obstacles: Vec::new(),
        }
    }

    /// Where new characters appear: the first spawn point, or the origin.
    pub fn spawn_point(&self) -> Position {
        self.spawn_points.first().copied().unwrap_or_default()
    }
}
