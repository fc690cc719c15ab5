//! Idle-session reaper.
//!
//! Every received byte refreshes a session's activity timestamp; this task
//! scans the registry on a fixed cadence and disconnects sessions whose
//! last activity is older than the timeout. The disconnect propagates
//! through the session's close signal, so the owning connection task
//! performs the usual single cleanup.

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::watch;

use crate::registry::ConnectionRegistry;

/// Runs until shutdown, checking every `check_interval` for sessions idle
/// longer than `timeout`.
pub async fn run_liveness_monitor(
    registry: Arc<ConnectionRegistry>,
    check_interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(check_interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        for session in registry.all() {
            let idle = session.idle_for();
            if idle > timeout {
                warn!(
                    "session {} idle for {:.1}s, disconnecting",
                    session.id(),
                    idle.as_secs_f32()
                );
                session.disconnect();
            }
        }
    }
}
