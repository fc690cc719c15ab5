//! Connection registry: the capacity gate and session directory.
//!
//! A semaphore carries the free slots; `try_add` reserves one and inserts
//! atomically with respect to other adds, `remove` releases it. Observers
//! registered before startup receive connected/disconnected events
//! synchronously with the add or remove that caused them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::info;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;

use crate::session::Session;

/// Lifecycle notifications emitted by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { session_id: String },
    Disconnected { session_id: String },
}

/// Concurrent session directory with a hard connection cap.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    slots: Semaphore,
    observers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            slots: Semaphore::new(max_connections),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Registers an event observer. Dead receivers are pruned lazily on the
    /// next emit.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .expect("registry lock poisoned")
            .push(tx);
        rx
    }

    fn emit(&self, event: SessionEvent) {
        self.observers
            .lock()
            .expect("registry lock poisoned")
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Reserves a slot and inserts the session. Returns false when the
    /// server is at capacity; the caller closes the socket without a reply.
    pub fn try_add(&self, session: Arc<Session>) -> bool {
        let permit = match self.slots.try_acquire() {
            Ok(permit) => permit,
            Err(_) => return false,
        };
        // The permit is restored explicitly in remove().
        permit.forget();

        let session_id = session.id().to_string();
        self.sessions
            .write()
            .expect("registry lock poisoned")
            .insert(session_id.clone(), session);
        info!("session {} connected", session_id);
        self.emit(SessionEvent::Connected { session_id });
        true
    }

    /// Removes a session and releases its slot. Safe to call for ids that
    /// were never added or were already removed.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .expect("registry lock poisoned")
            .remove(session_id);
        if removed.is_some() {
            self.slots.add_permits(1);
            info!("session {} disconnected", session_id);
            self.emit(SessionEvent::Disconnected {
                session_id: session_id.to_string(),
            });
        }
        removed
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .expect("registry lock poisoned")
            .get(session_id)
            .cloned()
    }

    /// Snapshot of every registered session.
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().expect("registry lock poisoned").len()
    }
}
