//! A map: its entities, spatial grid, interest manager, state tracker, and
//! the tick loop that drives them.
//!
//! The tick loop is the single writer of entity positions; packet handlers
//! only write intent (the move target), which the next tick integrates.
//! Every entity in the map is also present in the spatial grid at its
//! current (x, z) cell; `add`, `remove`, and the tick keep that invariant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info};
use rand::Rng;
use shared::{ObjectKind, SnapshotEntry};
use tokio::sync::watch;

use crate::descriptor::MapDescriptor;
use crate::entity::{Character, GameObject, MONSTER_ID_START};
use crate::interest::InterestManager;
use crate::monster::CHASE_LEASH_FACTOR;
use crate::pool::ObjectPool;
use crate::spatial::SpatialGrid;
use crate::tracker::StateTracker;

/// Sleep used by the idle fast-path when the map has no characters.
const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Broadcast-relevant summary of one entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityBrief {
    pub id: u32,
    pub kind: ObjectKind,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub level: i32,
}

impl EntityBrief {
    pub fn position(&self) -> (f32, f32, f32) {
        (self.x, self.y, self.z)
    }

    pub fn to_snapshot_entry(self) -> SnapshotEntry {
        SnapshotEntry {
            id: self.id,
            kind: self.kind,
            x: self.x,
            y: self.y,
            z: self.z,
            hp: self.hp,
            max_hp: self.max_hp,
            level: self.level,
        }
    }
}

fn brief_of(obj: &GameObject) -> EntityBrief {
    let (x, y, z) = obj.position();
    EntityBrief {
        id: obj.id(),
        kind: obj.kind(),
        x,
        y,
        z,
        hp: obj.hp(),
        max_hp: obj.max_hp(),
        level: obj.level(),
    }
}

/// Hook invoked after each simulation tick; the game service implements
/// this to run its delta broadcast pass.
#[async_trait]
pub trait TickObserver: Send + Sync {
    async fn after_tick(&self, map: &Arc<GameMap>);
}

/// One simulated world.
pub struct GameMap {
    pub id: u32,
    pub name: String,
    descriptor: MapDescriptor,
    entities: Mutex<HashMap<u32, GameObject>>,
    grid: SpatialGrid,
    interest: InterestManager,
    tracker: StateTracker,
    pool: Arc<ObjectPool>,
    tick_period: Duration,
}

impl GameMap {
    /// Builds a map from its descriptor and spawns the monster population.
    pub fn from_descriptor(
        descriptor: MapDescriptor,
        cell_size: f32,
        tick_period: Duration,
        pool: Arc<ObjectPool>,
    ) -> Arc<Self> {
        let map = Arc::new(Self {
            id: descriptor.id,
            name: descriptor.name.clone(),
            entities: Mutex::new(HashMap::new()),
            grid: SpatialGrid::new(cell_size),
            interest: InterestManager::new(),
            tracker: StateTracker::new(),
            pool,
            tick_period,
            descriptor,
        });

        let mut rng = rand::thread_rng();
        let spawns = map.descriptor.monster_spawns.clone();
        let mut spawned = 0u32;
        for spawn in &spawns {
            for _ in 0..spawn.count {
                let (ax, ay, az) = spawn.position.as_tuple();
                let (x, z) = if spawn.spawn_radius > 0.0 {
                    (
                        ax + rng.gen_range(-spawn.spawn_radius..=spawn.spawn_radius),
                        az + rng.gen_range(-spawn.spawn_radius..=spawn.spawn_radius),
                    )
                } else {
                    (ax, az)
                };
                let mut monster = map.pool.rent_monster(x, ay, z);
                if let Some(hp) = spawn.hp {
                    monster.hp = hp;
                    monster.max_hp = hp;
                }
                if let Some(level) = spawn.level {
                    monster.level = level;
                }
                if let Some(speed) = spawn.move_speed {
                    monster.move_speed = speed;
                }
                if let Some(range) = spawn.detect_range {
                    monster.detect_range = range;
                }
                if let Some(range) = spawn.attack_range {
                    monster.attack_range = range;
                }
                monster.patrol_enabled = spawn.patrol;
                map.add(GameObject::Monster(monster));
                spawned += 1;
            }
        }
        info!(
            "map {} '{}' loaded with {} monsters",
            map.id, map.name, spawned
        );
        map
    }

    pub fn interest(&self) -> &InterestManager {
        &self.interest
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    /// Where new characters appear on this map.
    pub fn spawn_point(&self) -> (f32, f32, f32) {
        self.descriptor.spawn_point().as_tuple()
    }

    /// Inserts an entity and registers it with the grid.
    pub fn add(&self, obj: GameObject) {
        let id = obj.id();
        let (x, y, z) = obj.position();
        self.entities
            .lock()
            .expect("map lock poisoned")
            .insert(id, obj);
        self.grid.add(id, x, y, z);
    }

    /// Removes an entity, cleaning the grid, the tracker, and the reverse
    /// interest index. Returns the removed entity.
    pub fn remove(&self, id: u32) -> Option<GameObject> {
        let removed = self.entities.lock().expect("map lock poisoned").remove(&id);
        if removed.is_some() {
            self.grid.remove(id);
            self.tracker.remove(id);
            self.interest.resolve_on_despawn(id);
        }
        removed
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().expect("map lock poisoned").len()
    }

    pub fn character_count(&self) -> usize {
        self.entities
            .lock()
            .expect("map lock poisoned")
            .values()
            .filter(|obj| matches!(obj, GameObject::Character(_)))
            .count()
    }

    /// Entity ids within range of a point; delegates to the grid.
    pub fn get_in_range(&self, x: f32, y: f32, z: f32, r: f32) -> Vec<u32> {
        self.grid.range(x, y, z, r)
    }

    pub fn brief(&self, id: u32) -> Option<EntityBrief> {
        self.entities
            .lock()
            .expect("map lock poisoned")
            .get(&id)
            .map(brief_of)
    }

    pub fn all_briefs(&self) -> Vec<EntityBrief> {
        self.entities
            .lock()
            .expect("map lock poisoned")
            .values()
            .map(brief_of)
            .collect()
    }

    /// The character owned by a session, if any.
    pub fn character_by_session(&self, session_id: &str) -> Option<u32> {
        self.entities
            .lock()
            .expect("map lock poisoned")
            .values()
            .find_map(|obj| match obj {
                GameObject::Character(c) if c.session_id == session_id => Some(c.id),
                _ => None,
            })
    }

    /// Pulls a session's character out of the map entirely (for parking).
    pub fn take_character_by_session(&self, session_id: &str) -> Option<Character> {
        let id = self.character_by_session(session_id)?;
        match self.remove(id) {
            Some(GameObject::Character(c)) => Some(c),
            // Id ranges make this unreachable, but stay total.
            Some(other) => {
                self.add(other);
                None
            }
            None => None,
        }
    }

    /// Sets a character's move target; the tick applies the motion.
    pub fn set_move_target(&self, character_id: u32, target: (f32, f32, f32)) -> bool {
        let mut entities = self.entities.lock().expect("map lock poisoned");
        match entities.get_mut(&character_id) {
            Some(GameObject::Character(c)) => {
                c.move_target = Some(target);
                true
            }
            _ => false,
        }
    }

    /// Advances the simulation by `dt` seconds: integrates movement,
    /// propagates moved positions to the grid, sweeps inactive entities
    /// back to the pool, and runs the AI target scan.
    pub fn tick(&self, dt: f32) {
        let mut entities = self.entities.lock().expect("map lock poisoned");

        // Character positions as of the start of the tick, for chasing.
        let char_positions: HashMap<u32, (f32, f32, f32)> = entities
            .values()
            .filter_map(|obj| match obj {
                GameObject::Character(c) => Some((c.id, c.position())),
                _ => None,
            })
            .collect();

        let mut inactive = Vec::new();
        for (id, obj) in entities.iter_mut() {
            let moved = match obj {
                GameObject::Character(c) => c.update(dt),
                GameObject::Monster(m) => {
                    let target = m.target_id.and_then(|tid| char_positions.get(&tid).copied());
                    m.update(dt, target)
                }
            };
            if moved {
                let (x, y, z) = obj.position();
                self.grid.update(*id, x, y, z);
            }
            if !obj.active() {
                inactive.push(*id);
            }
        }

        for id in inactive {
            if let Some(obj) = entities.remove(&id) {
                debug!("map {}: entity {} swept", self.id, id);
                self.grid.remove(id);
                self.tracker.remove(id);
                self.interest.resolve_on_despawn(id);
                match obj {
                    GameObject::Character(c) => self.pool.return_character(c),
                    GameObject::Monster(m) => self.pool.return_monster(m),
                }
            }
        }

        // AI scan: idle and patrolling monsters periodically look for the
        // nearest active character inside their detect range.
        let updated_char_positions: HashMap<u32, (f32, f32, f32)> = entities
            .values()
            .filter_map(|obj| match obj {
                GameObject::Character(c) => Some((c.id, c.position())),
                _ => None,
            })
            .collect();

        for obj in entities.values_mut() {
            let GameObject::Monster(m) = obj else {
                continue;
            };
            if !m.should_rescan(dt) {
                continue;
            }
            let (mx, my, mz) = m.position();
            let candidates = self
                .grid
                .range(mx, my, mz, m.detect_range * CHASE_LEASH_FACTOR);

            let mut best: Option<(u32, f32)> = None;
            for candidate in candidates {
                if candidate >= MONSTER_ID_START {
                    continue;
                }
                let Some(&(cx, cy, cz)) = updated_char_positions.get(&candidate) else {
                    continue;
                };
                let dx = cx - mx;
                let dy = cy - my;
                let dz = cz - mz;
                let dist = (dx * dx + dy * dy + dz * dz).sqrt();
                if dist <= m.detect_range && best.map_or(true, |(_, d)| dist < d) {
                    best = Some((candidate, dist));
                }
            }
            if let Some((target, _)) = best {
                m.acquire_target(target);
            }
        }
    }
}

/// Runs a map's simulation at its tick rate until shutdown.
///
/// A single cooperative task: sleep 1 s while the map is empty of
/// characters, otherwise tick, let the observer broadcast, and sleep the
/// remainder of the period.
pub async fn run_tick_loop(
    map: Arc<GameMap>,
    observer: Arc<dyn TickObserver>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = map.tick_period();
    let mut last_tick = Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }

        if map.character_count() == 0 {
            tokio::select! {
                _ = tokio::time::sleep(IDLE_SLEEP) => {}
                _ = shutdown.changed() => {}
            }
            last_tick = Instant::now();
            continue;
        }

        let start = Instant::now();
        let dt = start.duration_since(last_tick).as_secs_f32().min(1.0);
        last_tick = start;

        map.tick(dt);
        observer.after_tick(&map).await;

        let elapsed = start.elapsed();
        if elapsed < period {
            tokio::select! {
                _ = tokio::time::sleep(period - elapsed) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
    info!("map {} tick loop stopped", map.id);
}
