//! AI-driven monsters and their state machine.
//!
//! State transitions:
//!
//! ```text
//!            3 s            arrive (<0.5)
//!   Idle ----------> Patrol ----------> Idle
//!     \                 |
//!      \  character in  |  character in
//!       \ detect range  |  detect range
//!        v              v
//!            Chase <----+
//!           /     \
//!  <= attack       > 1.5 x detect
//!   range  |        range -> Idle (target cleared)
//!          v
//!        Attack --> Chase (target left attack range)
//!
//!   any state, hp <= 0 -> Dead (inactive; swept by the map)
//! ```
//!
//! Each state runs its logic at its own cadence (Idle 0.5 s, Patrol 0.2 s,
//! Chase 0.1 s, Attack every tick); internal timers reset on transition.
//! Target acquisition is driven by the map, which owns the spatial grid.

use rand::Rng;

/// AI state of a monster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonsterState {
    Idle,
    Patrol,
    Chase,
    Attack,
    Dead,
}

/// Seconds a monster idles before picking a patrol target.
pub const IDLE_BEFORE_PATROL: f32 = 3.0;
/// Patrol targets are chosen within this box radius of the spawn anchor.
pub const PATROL_SPREAD: f32 = 5.0;
/// Distance at which a patrol target counts as reached.
pub const PATROL_ARRIVE: f32 = 0.5;
/// Chase is abandoned beyond this multiple of the detect range.
pub const CHASE_LEASH_FACTOR: f32 = 1.5;
/// Seconds between target rescans while idle or patrolling.
pub const RESCAN_INTERVAL: f32 = 0.3;

/// A pooled, respawnable AI combatant.
#[derive(Debug, Clone)]
pub struct Monster {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub level: i32,
    pub move_speed: f32,
    pub attack_damage: i32,
    pub attack_range: f32,
    pub detect_range: f32,
    /// Point the monster was spawned at; patrols stay near it.
    pub spawn_anchor: (f32, f32, f32),
    pub state: MonsterState,
    /// Seconds spent in the current state.
    state_time: f32,
    /// Accumulator gating state logic to the per-state cadence.
    update_timer: f32,
    /// Accumulator gating target rescans.
    rescan_timer: f32,
    pub patrol_target: Option<(f32, f32, f32)>,
    /// Character currently being chased or attacked.
    pub target_id: Option<u32>,
    /// When false (descriptor patrol flag), the monster never leaves Idle
    /// on its own; it still chases once a target is acquired.
    pub patrol_enabled: bool,
    pub active: bool,
}

impl Monster {
    pub fn new(id: u32, x: f32, y: f32, z: f32) -> Self {
        Self {
            id,
            x,
            y,
            z,
            hp: 100,
            max_hp: 100,
            level: 1,
            move_speed: 3.0,
            attack_damage: 10,
            attack_range: 2.0,
            detect_range: 15.0,
            spawn_anchor: (x, y, z),
            state: MonsterState::Idle,
            state_time: 0.0,
            update_timer: 0.0,
            rescan_timer: 0.0,
            patrol_target: None,
            target_id: None,
            patrol_enabled: true,
            active: true,
        }
    }

    pub fn position(&self) -> (f32, f32, f32) {
        (self.x, self.y, self.z)
    }

    /// Seconds of state logic batched together per state.
    fn cadence(&self) -> f32 {
        match self.state {
            MonsterState::Idle => 0.5,
            MonsterState::Patrol => 0.2,
            MonsterState::Chase => 0.1,
            MonsterState::Attack | MonsterState::Dead => 0.0,
        }
    }

    fn transition(&mut self, next: MonsterState) {
        self.state = next;
        self.state_time = 0.0;
        self.update_timer = 0.0;
    }

    fn distance_to(&self, (px, py, pz): (f32, f32, f32)) -> f32 {
        let dx = px - self.x;
        let dy = py - self.y;
        let dz = pz - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    fn step_toward(&mut self, (tx, ty, tz): (f32, f32, f32), step: f32) {
        let dx = tx - self.x;
        let dy = ty - self.y;
        let dz = tz - self.z;
        let dist = (dx * dx + dy * dy + dz * dz).sqrt();
        if dist <= step {
            self.x = tx;
            self.y = ty;
            self.z = tz;
        } else if dist > 0.0 {
            self.x += dx / dist * step;
            self.y += dy / dist * step;
            self.z += dz / dist * step;
        }
    }

    /// Whether this monster is due for a character rescan. Only idle and
    /// patrolling monsters look for targets; the timer still resets when
    /// it fires.
    pub fn should_rescan(&mut self, dt: f32) -> bool {
        if !matches!(self.state, MonsterState::Idle | MonsterState::Patrol) {
            self.rescan_timer = 0.0;
            return false;
        }
        self.rescan_timer += dt;
        if self.rescan_timer >= RESCAN_INTERVAL {
            self.rescan_timer = 0.0;
            true
        } else {
            false
        }
    }

    /// Locks onto a character and snaps to Chase. Called by the map when a
    /// rescan finds a character inside the detect range.
    pub fn acquire_target(&mut self, target_id: u32) {
        self.target_id = Some(target_id);
        self.transition(MonsterState::Chase);
    }

    /// Runs one tick of the state machine.
    ///
    /// `target_pos` is the chase target's current position, or `None` when
    /// the target no longer exists. Returns whether the monster moved.
    pub fn update(&mut self, dt: f32, target_pos: Option<(f32, f32, f32)>) -> bool {
        if self.hp <= 0 && self.state != MonsterState::Dead {
            self.transition(MonsterState::Dead);
            self.active = false;
            self.target_id = None;
            return false;
        }
        if self.state == MonsterState::Dead {
            return false;
        }

        // Batch state logic to the per-state cadence.
        self.update_timer += dt;
        let cadence = self.cadence();
        if self.update_timer < cadence {
            return false;
        }
        let step_dt = self.update_timer;
        self.update_timer = 0.0;

        let before = self.position();
        match self.state {
            MonsterState::Idle => {
                self.state_time += step_dt;
                if self.patrol_enabled && self.state_time >= IDLE_BEFORE_PATROL {
                    let mut rng = rand::thread_rng();
                    let (ax, ay, az) = self.spawn_anchor;
                    self.patrol_target = Some((
                        ax + rng.gen_range(-PATROL_SPREAD..=PATROL_SPREAD),
                        ay,
                        az + rng.gen_range(-PATROL_SPREAD..=PATROL_SPREAD),
                    ));
                    self.transition(MonsterState::Patrol);
                }
            }
            MonsterState::Patrol => {
                if let Some(target) = self.patrol_target {
                    self.step_toward(target, self.move_speed * step_dt);
                    if self.distance_to(target) < PATROL_ARRIVE {
                        self.patrol_target = None;
                        self.transition(MonsterState::Idle);
                    }
                } else {
                    self.transition(MonsterState::Idle);
                }
            }
            MonsterState::Chase => match target_pos {
                Some(pos) => {
                    let dist = self.distance_to(pos);
                    if dist > self.detect_range * CHASE_LEASH_FACTOR {
                        self.target_id = None;
                        self.transition(MonsterState::Idle);
                    } else if dist <= self.attack_range {
                        self.transition(MonsterState::Attack);
                    } else {
                        self.step_toward(pos, self.move_speed * step_dt);
                    }
                }
                None => {
                    self.target_id = None;
                    self.transition(MonsterState::Idle);
                }
            },
            MonsterState::Attack => match target_pos {
                Some(pos) => {
                    if self.distance_to(pos) > self.attack_range {
                        self.transition(MonsterState::Chase);
                    }
                    // Damage application is a future extension point.
                }
                None => {
                    self.target_id = None;
                    self.transition(MonsterState::Idle);
                }
            },
            MonsterState::Dead => {}
        }

        self.position() != before
    }

    /// Resets every field to defaults so the instance can be pooled.
    pub fn reset(&mut self) {
        *self = Monster::new(0, 0.0, 0.0, 0.0);
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monster() -> Monster {
        Monster::new(10_000, 0.0, 0.0, 0.0)
    }

    /// Drives the state machine in small ticks for a total duration.
    fn run(m: &mut Monster, seconds: f32, target: Option<(f32, f32, f32)>) {
        let mut t = 0.0;
        while t < seconds {
            m.update(0.05, target);
            t += 0.05;
        }
    }

    #[test]
    fn test_spawns_idle() {
        let m = monster();
        assert_eq!(m.state, MonsterState::Idle);
        assert!(m.active);
        assert!(m.target_id.is_none());
    }

    #[test]
    fn test_idle_transitions_to_patrol_after_three_seconds() {
        let mut m = monster();
        run(&mut m, 2.5, None);
        assert_eq!(m.state, MonsterState::Idle);
        run(&mut m, 1.0, None);
        assert_eq!(m.state, MonsterState::Patrol);
        let (tx, _, tz) = m.patrol_target.expect("patrol target set");
        assert!(tx.abs() <= PATROL_SPREAD);
        assert!(tz.abs() <= PATROL_SPREAD);
    }

    #[test]
    fn test_patrol_walks_to_target_then_idles() {
        let mut m = monster();
        run(&mut m, 3.5, None);
        assert_eq!(m.state, MonsterState::Patrol);
        // Plenty of time to cover at most ~7 units at 3 units/s.
        run(&mut m, 5.0, None);
        assert_eq!(m.state, MonsterState::Idle);
        assert!(m.patrol_target.is_none());
    }

    #[test]
    fn test_patrol_disabled_monster_stays_idle() {
        let mut m = monster();
        m.patrol_enabled = false;
        run(&mut m, 10.0, None);
        assert_eq!(m.state, MonsterState::Idle);
        assert_eq!(m.position(), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_acquire_target_snaps_to_chase() {
        let mut m = monster();
        m.acquire_target(1);
        assert_eq!(m.state, MonsterState::Chase);
        assert_eq!(m.target_id, Some(1));
    }

    #[test]
    fn test_chase_closes_distance() {
        let mut m = monster();
        m.acquire_target(1);
        let target = (10.0, 0.0, 0.0);
        let before = m.distance_to(target);
        run(&mut m, 1.0, Some(target));
        assert!(m.distance_to(target) < before);
    }

    #[test]
    fn test_chase_enters_attack_in_range() {
        let mut m = monster();
        m.acquire_target(1);
        run(&mut m, 0.2, Some((1.0, 0.0, 0.0)));
        assert_eq!(m.state, MonsterState::Attack);
    }

    #[test]
    fn test_attack_reverts_to_chase_when_target_retreats() {
        let mut m = monster();
        m.acquire_target(1);
        run(&mut m, 0.2, Some((1.0, 0.0, 0.0)));
        assert_eq!(m.state, MonsterState::Attack);
        m.update(0.05, Some((8.0, 0.0, 0.0)));
        assert_eq!(m.state, MonsterState::Chase);
    }

    #[test]
    fn test_chase_abandoned_past_leash() {
        let mut m = monster();
        m.acquire_target(1);
        // 1.5 x detect_range(15) = 22.5
        run(&mut m, 0.2, Some((40.0, 0.0, 0.0)));
        assert_eq!(m.state, MonsterState::Idle);
        assert!(m.target_id.is_none());
    }

    #[test]
    fn test_chase_with_vanished_target_idles() {
        let mut m = monster();
        m.acquire_target(1);
        run(&mut m, 0.2, None);
        assert_eq!(m.state, MonsterState::Idle);
        assert!(m.target_id.is_none());
    }

    #[test]
    fn test_death_deactivates() {
        let mut m = monster();
        m.hp = 0;
        m.update(0.05, None);
        assert_eq!(m.state, MonsterState::Dead);
        assert!(!m.active);
        // Further updates do nothing.
        assert!(!m.update(0.05, None));
    }

    #[test]
    fn test_rescan_cadence() {
        let mut m = monster();
        assert!(!m.should_rescan(0.1));
        assert!(!m.should_rescan(0.1));
        assert!(m.should_rescan(0.15));
        // Timer reset after firing.
        assert!(!m.should_rescan(0.1));
    }

    #[test]
    fn test_no_rescan_while_chasing() {
        let mut m = monster();
        m.acquire_target(1);
        assert!(!m.should_rescan(1.0));
    }

    #[test]
    fn test_idle_cadence_batches_updates() {
        let mut m = monster();
        // Nine 50 ms ticks stay under the 0.5 s idle cadence.
        for _ in 0..9 {
            m.update(0.05, None);
        }
        assert_eq!(m.state, MonsterState::Idle);
        assert_eq!(m.state_time, 0.0);
        // The tenth crosses it and banks 0.5 s of idle time.
        m.update(0.05, None);
        assert!(m.state_time > 0.0);
    }

    #[test]
    fn test_reset_returns_to_defaults() {
        let mut m = monster();
        m.hp = 0;
        m.update(0.05, None);
        m.reset();
        assert_eq!(m.id, 0);
        assert_eq!(m.state, MonsterState::Idle);
        assert!(!m.active);
        assert_eq!(m.hp, 100);
    }
}
