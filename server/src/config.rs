//! Server tuning knobs with their defaults.

use std::net::SocketAddr;
use std::time::Duration;

/// Everything the server needs to know at startup. Built from CLI arguments
/// in `main` or constructed directly in tests with short timeouts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections; accepts beyond this are closed
    /// immediately without a reply frame.
    pub max_connections: usize,
    /// Simulation tick period per map.
    pub tick_period: Duration,
    /// Number of packet dispatch workers.
    pub worker_count: usize,
    /// Bound of each session's outbound packet queue; producers block when
    /// it is full.
    pub send_queue_len: usize,
    /// Radius of each session's interest area in world units.
    pub interest_radius: f32,
    /// Spatial grid cell size in world units.
    pub cell_size: f32,
    /// How long a disconnected session's character is parked before it is
    /// destroyed.
    pub reconnect_grace: Duration,
    /// Cadence of the parked-character sweeper.
    pub park_sweep_interval: Duration,
    /// Cadence of the liveness scan.
    pub heartbeat_check_interval: Duration,
    /// Sessions idle longer than this are disconnected.
    pub liveness_timeout: Duration,
    /// When set, a failed login registers the account and retries once.
    pub allow_auto_register: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8888".parse().expect("static addr"),
            max_connections: 256,
            tick_period: Duration::from_millis(50),
            worker_count: 4,
            send_queue_len: 1000,
            interest_radius: 50.0,
            cell_size: 10.0,
            reconnect_grace: Duration::from_secs(30),
            park_sweep_interval: Duration::from_secs(5),
            heartbeat_check_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(90),
            allow_auto_register: false,
        }
    }
}
