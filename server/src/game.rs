//! The game service: wires sessions to characters and drives broadcasts.
//!
//! Handles Login, Reconnect, and Move packets, parks characters across
//! temporary disconnects, and after every map tick fans state deltas out to
//! the sessions whose interest areas cover them. A session's client learns
//! about an object exactly once via ObjectSpawn (tracked in the per-session
//! known set), then receives ObjectUpdate deltas, then ObjectDespawn when
//! the object leaves its view or the world.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, info, warn};
use shared::protocol::{UPDATE_HP, UPDATE_LEVEL};
use shared::Packet;

use tokio::sync::watch;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::dispatch::{PacketContext, PacketHandler};
use crate::entity::{Character, GameObject};
use crate::map::{EntityBrief, GameMap, TickObserver};
use crate::pool::ObjectPool;
use crate::session::Session;
use crate::tracker::TrackedState;

/// A character waiting out the reconnection grace window.
struct ParkedCharacter {
    character: Character,
    since: Instant,
}

/// Session-to-world glue and broadcast engine.
pub struct GameService {
    auth: Arc<dyn Authenticator>,
    map: Arc<GameMap>,
    pool: Arc<ObjectPool>,
    config: ServerConfig,
    /// Session id -> live session handle.
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Session id -> character object id.
    characters: RwLock<HashMap<String, u32>>,
    /// Auth token -> session id.
    token_index: RwLock<HashMap<String, String>>,
    /// Username -> session id.
    username_index: RwLock<HashMap<String, String>>,
    /// Old session id -> character awaiting reconnection.
    parked: Mutex<HashMap<String, ParkedCharacter>>,
    /// Session id -> object ids already spawned to that client.
    known: RwLock<HashMap<String, HashSet<u32>>>,
}

impl GameService {
    pub fn new(
        config: ServerConfig,
        auth: Arc<dyn Authenticator>,
        map: Arc<GameMap>,
        pool: Arc<ObjectPool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            auth,
            map,
            pool,
            config,
            sessions: RwLock::new(HashMap::new()),
            characters: RwLock::new(HashMap::new()),
            token_index: RwLock::new(HashMap::new()),
            username_index: RwLock::new(HashMap::new()),
            parked: Mutex::new(HashMap::new()),
            known: RwLock::new(HashMap::new()),
        })
    }

    /// Makes a freshly accepted session addressable for broadcasts.
    pub fn register_session(&self, session: Arc<Session>) {
        let sid = session.id().to_string();
        self.sessions
            .write()
            .expect("service lock poisoned")
            .insert(sid.clone(), session);
        self.known
            .write()
            .expect("service lock poisoned")
            .insert(sid, HashSet::new());
    }

    fn session_by_id(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .expect("service lock poisoned")
            .get(session_id)
            .cloned()
    }

    /// Number of characters currently parked awaiting reconnection.
    pub fn parked_count(&self) -> usize {
        self.parked.lock().expect("service lock poisoned").len()
    }

    fn spawn_packet(brief: &EntityBrief) -> Packet {
        Packet::ObjectSpawn {
            id: brief.id,
            kind: brief.kind,
            x: brief.x,
            y: brief.y,
            z: brief.z,
            hp: brief.hp,
            max_hp: brief.max_hp,
            level: brief.level,
        }
    }

    /// Creates a character for the session at the map spawn point, installs
    /// its interest area, sends it the initial snapshot, and announces it
    /// to every neighbor. Returns the character id.
    async fn start_game(&self, session: &Arc<Session>) -> u32 {
        let sid = session.id().to_string();
        let (sx, sy, sz) = self.map.spawn_point();
        let character = self.pool.rent_character(&sid, sx, sy, sz);
        let char_id = character.id;
        self.map.add(GameObject::Character(character));
        self.characters
            .write()
            .expect("service lock poisoned")
            .insert(sid.clone(), char_id);
        self.map
            .interest()
            .set_area(&sid, sx, sy, sz, self.config.interest_radius);

        // Everything already inside the new view, excluding the avatar.
        let visible: Vec<EntityBrief> = self
            .map
            .get_in_range(sx, sy, sz, self.config.interest_radius)
            .into_iter()
            .filter(|&id| id != char_id)
            .filter_map(|id| self.map.brief(id))
            .collect();
        {
            let mut known = self.known.write().expect("service lock poisoned");
            let set = known.entry(sid.clone()).or_default();
            for brief in &visible {
                set.insert(brief.id);
            }
        }
        let entries = visible
            .into_iter()
            .map(EntityBrief::to_snapshot_entry)
            .collect();
        session.send(&Packet::ObjectSnapshot { entries }).await;

        self.broadcast_spawn(char_id, &sid).await;
        info!("session {} entered map {} as {}", sid, self.map.id, char_id);
        char_id
    }

    /// Announces an object to every other session whose area contains it.
    async fn broadcast_spawn(&self, object_id: u32, owner_sid: &str) {
        let Some(brief) = self.map.brief(object_id) else {
            return;
        };
        let audience = self
            .map
            .interest()
            .resolve_on_spawn(object_id, brief.x, brief.y, brief.z);

        let mut targets = Vec::new();
        {
            let sessions = self.sessions.read().expect("service lock poisoned");
            for sid in &audience {
                if sid == owner_sid {
                    continue;
                }
                if let Some(session) = sessions.get(sid) {
                    targets.push((sid.clone(), Arc::clone(session)));
                }
            }
        }
        {
            let mut known = self.known.write().expect("service lock poisoned");
            for (sid, _) in &targets {
                known.entry(sid.clone()).or_default().insert(object_id);
            }
        }
        let packet = Self::spawn_packet(&brief);
        for (_, session) in targets {
            session.send(&packet).await;
        }
    }

    async fn handle_login(&self, session: &Arc<Session>, username: &str, password: &str) {
        let sid = session.id().to_string();
        if self
            .characters
            .read()
            .expect("service lock poisoned")
            .contains_key(&sid)
        {
            session
                .send(&Packet::LoginResponse {
                    success: false,
                    message: "already in game".to_string(),
                    token: String::new(),
                })
                .await;
            return;
        }

        let token = match self.auth.authenticate(username, password).await {
            Ok(token) => token,
            Err(err) => {
                // Optional test affordance: register the account and retry
                // once.
                let retried = if self.config.allow_auto_register
                    && self.auth.register(username, password).await.is_ok()
                {
                    self.auth.authenticate(username, password).await.ok()
                } else {
                    None
                };
                match retried {
                    Some(token) => token,
                    None => {
                        debug!("login failed for '{}': {}", username, err);
                        session
                            .send(&Packet::LoginResponse {
                                success: false,
                                message: err.to_string(),
                                token: String::new(),
                            })
                            .await;
                        return;
                    }
                }
            }
        };

        self.start_game(session).await;
        self.token_index
            .write()
            .expect("service lock poisoned")
            .insert(token.clone(), sid.clone());
        self.username_index
            .write()
            .expect("service lock poisoned")
            .insert(username.to_string(), sid);

        session
            .send(&Packet::LoginResponse {
                success: true,
                message: "welcome".to_string(),
                token,
            })
            .await;
    }

    async fn handle_reconnect(&self, session: &Arc<Session>, token: &str, username: &str) {
        let new_sid = session.id().to_string();
        if self
            .characters
            .read()
            .expect("service lock poisoned")
            .contains_key(&new_sid)
        {
            session
                .send(&Packet::ReconnectResponse {
                    success: false,
                    message: "already in game".to_string(),
                    session_id: String::new(),
                })
                .await;
            return;
        }

        // Resolve the previous session: validated token first, then the
        // username fallback (covers lost tokens and server-side restarts of
        // the token store).
        let mut old_sid: Option<String> = None;
        if !token.is_empty() && self.auth.validate_token(token).await.is_some() {
            old_sid = self
                .token_index
                .read()
                .expect("service lock poisoned")
                .get(token)
                .cloned();
        }
        if old_sid.is_none() {
            old_sid = self
                .username_index
                .read()
                .expect("service lock poisoned")
                .get(username)
                .cloned();
        }

        let adopted = match &old_sid {
            Some(old) => {
                let parked = self
                    .parked
                    .lock()
                    .expect("service lock poisoned")
                    .remove(old)
                    .map(|p| p.character);
                parked.or_else(|| self.map.take_character_by_session(old))
            }
            None => None,
        };

        match adopted {
            Some(mut character) => {
                if let Some(old) = &old_sid {
                    self.characters
                        .write()
                        .expect("service lock poisoned")
                        .remove(old);
                }
                character.session_id = new_sid.clone();
                character.active = true;
                let char_id = character.id;
                let (x, y, z) = character.position();
                self.map.add(GameObject::Character(character));
                self.characters
                    .write()
                    .expect("service lock poisoned")
                    .insert(new_sid.clone(), char_id);
                if !token.is_empty() {
                    self.token_index
                        .write()
                        .expect("service lock poisoned")
                        .insert(token.to_string(), new_sid.clone());
                }
                self.username_index
                    .write()
                    .expect("service lock poisoned")
                    .insert(username.to_string(), new_sid.clone());
                self.map
                    .interest()
                    .set_area(&new_sid, x, y, z, self.config.interest_radius);
                self.broadcast_spawn(char_id, &new_sid).await;
                info!(
                    "session {} resumed character {} at ({:.1}, {:.1}, {:.1})",
                    new_sid, char_id, x, y, z
                );
                session
                    .send(&Packet::ReconnectResponse {
                        success: true,
                        message: "session restored".to_string(),
                        session_id: new_sid,
                    })
                    .await;
            }
            None => {
                // Reconnection miss: treat it as a fresh login on the same
                // connection.
                self.start_game(session).await;
                self.username_index
                    .write()
                    .expect("service lock poisoned")
                    .insert(username.to_string(), new_sid.clone());
                session
                    .send(&Packet::ReconnectResponse {
                        success: true,
                        message: "no previous session found, started a new game".to_string(),
                        session_id: new_sid,
                    })
                    .await;
            }
        }
    }

    async fn handle_move(&self, session: &Arc<Session>, x: f32, y: f32, z: f32) {
        let char_id = self
            .characters
            .read()
            .expect("service lock poisoned")
            .get(session.id())
            .copied();
        match char_id {
            Some(id) => {
                self.map.set_move_target(id, (x, y, z));
            }
            None => debug!(
                "move request from session {} with no character",
                session.id()
            ),
        }
    }

    /// Called once when a session's connection is gone: despawns the avatar
    /// from neighboring views and parks it for the grace window.
    pub async fn on_session_closed(&self, session_id: &str) {
        self.sessions
            .write()
            .expect("service lock poisoned")
            .remove(session_id);
        self.known
            .write()
            .expect("service lock poisoned")
            .remove(session_id);

        let char_id = self
            .characters
            .write()
            .expect("service lock poisoned")
            .remove(session_id);
        let Some(char_id) = char_id else {
            return;
        };

        self.map.interest().remove_area(session_id);
        let audience = self.map.interest().resolve_on_despawn(char_id);

        let mut targets = Vec::new();
        {
            let sessions = self.sessions.read().expect("service lock poisoned");
            let mut known = self.known.write().expect("service lock poisoned");
            for sid in &audience {
                if let Some(set) = known.get_mut(sid) {
                    set.remove(&char_id);
                }
                if let Some(session) = sessions.get(sid) {
                    targets.push(Arc::clone(session));
                }
            }
        }
        for session in targets {
            session.send(&Packet::ObjectDespawn { id: char_id }).await;
        }

        if let Some(character) = self.map.take_character_by_session(session_id) {
            info!(
                "parking character {} of session {} for {:?}",
                char_id, session_id, self.config.reconnect_grace
            );
            self.parked.lock().expect("service lock poisoned").insert(
                session_id.to_string(),
                ParkedCharacter {
                    character,
                    since: Instant::now(),
                },
            );
        }
    }

    /// Evicts parked characters whose grace window expired. Invoked by the
    /// sweeper task.
    pub fn sweep_parked(&self) {
        let grace = self.config.reconnect_grace;
        let expired: Vec<(String, Character)> = {
            let mut parked = self.parked.lock().expect("service lock poisoned");
            let expired_sids: Vec<String> = parked
                .iter()
                .filter(|(_, p)| p.since.elapsed() > grace)
                .map(|(sid, _)| sid.clone())
                .collect();
            expired_sids
                .into_iter()
                .filter_map(|sid| parked.remove(&sid).map(|p| (sid, p.character)))
                .collect()
        };

        for (sid, character) in expired {
            info!(
                "reconnect grace expired for session {}, destroying character {}",
                sid, character.id
            );
            self.username_index
                .write()
                .expect("service lock poisoned")
                .retain(|_, v| v != &sid);
            self.token_index
                .write()
                .expect("service lock poisoned")
                .retain(|_, v| v != &sid);
            self.pool.return_character(character);
        }
    }
}

#[async_trait]
impl PacketHandler for GameService {
    async fn handle(
        &self,
        ctx: PacketContext,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match ctx.packet {
            Packet::LoginRequest { username, password } => {
                self.handle_login(&ctx.session, &username, &password).await;
            }
            Packet::ReconnectRequest { token, username } => {
                self.handle_reconnect(&ctx.session, &token, &username).await;
            }
            Packet::MoveRequest { x, y, z } => {
                self.handle_move(&ctx.session, x, y, z).await;
            }
            Packet::Heartbeat => {
                // Normally consumed by the read loop; nothing to do.
            }
            other => {
                warn!(
                    "session {} sent server-bound packet id {}",
                    ctx.session.id(),
                    other.id()
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TickObserver for GameService {
    /// The per-tick broadcast pass: follow avatars with their interest
    /// areas, send field deltas to informed viewers, then diff each view to
    /// emit spawns and despawns.
    async fn after_tick(&self, map: &Arc<GameMap>) {
        let radius = self.config.interest_radius;
        let session_chars: Vec<(String, u32)> = self
            .characters
            .read()
            .expect("service lock poisoned")
            .iter()
            .map(|(sid, id)| (sid.clone(), *id))
            .collect();

        // Interest areas track avatar positions.
        for (sid, char_id) in &session_chars {
            if let Some(brief) = map.brief(*char_id) {
                map.interest()
                    .set_area(sid, brief.x, brief.y, brief.z, radius);
            }
        }

        // Field-level deltas to viewers that already know the object.
        let mut outgoing: Vec<(Arc<Session>, Packet)> = Vec::new();
        for brief in map.all_briefs() {
            let delta = map.tracker().delta(
                brief.id,
                TrackedState {
                    x: brief.x,
                    y: brief.y,
                    z: brief.z,
                    hp: brief.hp,
                    level: brief.level,
                },
            );
            if delta.is_empty() {
                continue;
            }
            let audience = if delta.position_changed() {
                map.interest().resolve_on_move(
                    brief.id,
                    (delta.previous.x, delta.previous.y, delta.previous.z),
                    (brief.x, brief.y, brief.z),
                )
            } else {
                map.interest().watchers_of(brief.id)
            };
            if audience.is_empty() {
                continue;
            }

            let packet = Packet::ObjectUpdate {
                id: brief.id,
                position: delta
                    .position_changed()
                    .then_some((brief.x, brief.y, brief.z)),
                hp: (delta.flags & UPDATE_HP != 0).then_some(brief.hp),
                level: (delta.flags & UPDATE_LEVEL != 0).then_some(brief.level),
            };
            let sessions = self.sessions.read().expect("service lock poisoned");
            let known = self.known.read().expect("service lock poisoned");
            for sid in audience {
                let informed = known.get(&sid).is_some_and(|set| set.contains(&brief.id));
                if informed {
                    if let Some(session) = sessions.get(&sid) {
                        outgoing.push((Arc::clone(session), packet.clone()));
                    }
                }
            }
        }
        for (session, packet) in outgoing {
            session.send(&packet).await;
        }

        // View diffs: spawn what entered each view, despawn what left.
        for (sid, char_id) in &session_chars {
            let Some(area) = map.interest().area_of(sid) else {
                continue;
            };
            let in_range: HashSet<u32> = map
                .get_in_range(area.x, area.y, area.z, area.radius)
                .into_iter()
                .filter(|id| id != char_id)
                .collect();

            let (entered, left) = {
                let known = self.known.read().expect("service lock poisoned");
                let Some(set) = known.get(sid) else {
                    continue;
                };
                (
                    in_range.difference(set).copied().collect::<Vec<u32>>(),
                    set.difference(&in_range).copied().collect::<Vec<u32>>(),
                )
            };
            if entered.is_empty() && left.is_empty() {
                continue;
            }
            {
                let mut known = self.known.write().expect("service lock poisoned");
                if let Some(set) = known.get_mut(sid) {
                    for id in &entered {
                        set.insert(*id);
                    }
                    for id in &left {
                        set.remove(id);
                    }
                }
            }
            let Some(session) = self.session_by_id(sid) else {
                continue;
            };
            for id in entered {
                if let Some(brief) = map.brief(id) {
                    session.send(&Self::spawn_packet(&brief)).await;
                }
            }
            for id in left {
                session.send(&Packet::ObjectDespawn { id }).await;
            }
        }
    }
}

/// Periodically evicts parked characters whose grace window expired.
pub async fn run_park_sweeper(service: Arc<GameService>, mut shutdown: watch::Receiver<bool>) {
    let interval = service.config.park_sweep_interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
        service.sweep_parked();
    }
}
