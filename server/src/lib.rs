//! # World Server Library
//!
//! Authoritative TCP server for a session-based multiplayer world. Clients
//! connect, authenticate, spawn an avatar on a shared map, move around, and
//! receive updates for the entities inside their interest area.
//!
//! ## Pipeline
//!
//! Bytes arrive on a session socket, the frame codec yields typed packets,
//! the dispatcher queues them by priority for its worker pool, and a worker
//! invokes the game service. The service mutates map state; the map's tick
//! loop advances movement and monster AI; the state tracker emits per-field
//! deltas; the interest manager resolves the audience; and each recipient's
//! session writer queues the outbound frames.
//!
//! ## Modules
//!
//! - [`config`]: tuning knobs and defaults
//! - [`auth`]: the authenticator seam and the in-memory implementation
//! - [`session`]: one connection, its queues and I/O loops
//! - [`registry`]: connection cap and session directory
//! - [`liveness`]: idle-session reaper
//! - [`dispatch`]: priority queue and worker pool
//! - [`spatial`]: uniform grid over (x, z)
//! - [`interest`]: per-session view circles and the reverse index
//! - [`tracker`]: last-broadcast snapshots and deltas
//! - [`entity`], [`monster`], [`pool`]: characters, monster AI, instance reuse
//! - [`descriptor`], [`map`]: static map data and the tick loop
//! - [`game`]: login/reconnect/move handling and the broadcast pass
//! - [`network`]: listener, accept loop, lifecycle

pub mod auth;
pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod entity;
pub mod game;
pub mod interest;
pub mod liveness;
pub mod map;
pub mod monster;
pub mod network;
pub mod pool;
pub mod registry;
pub mod session;
pub mod spatial;
pub mod tracker;
