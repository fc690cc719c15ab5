//! Priority-ordered packet dispatch over a fixed worker pool.
//!
//! One max-heap, one availability semaphore, N workers. Each queued item
//! carries the session, the decoded packet, the receive time, and the
//! priority class. Workers pop the highest class first; within one class the
//! heap breaks ties by arrival sequence, but because workers run in
//! parallel, equal-priority completion order is still not guaranteed.
//! Handlers needing per-session order must serialize internally.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, error};
use shared::Packet;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::session::Session;

/// Everything a handler learns about one inbound packet.
pub struct PacketContext {
    pub session: Arc<Session>,
    pub packet: Packet,
    pub received_at: Instant,
    pub priority: i32,
}

/// Application-level packet processor invoked by the workers.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: PacketContext,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

struct QueuedItem {
    priority: i32,
    seq: u64,
    ctx: PacketContext,
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedItem {}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then earlier arrival.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

/// The shared queue plus its worker pool.
pub struct PacketDispatcher {
    queue: Mutex<BinaryHeap<QueuedItem>>,
    available: Arc<Semaphore>,
    seq: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            available: Arc::new(Semaphore::new(0)),
            seq: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `worker_count` tasks that pull from the queue until
    /// [`PacketDispatcher::close`] is called.
    pub fn start(self: Arc<Self>, handler: Arc<dyn PacketHandler>, worker_count: usize) {
        let mut workers = self.workers.lock().expect("dispatcher lock poisoned");
        for worker_id in 0..worker_count {
            let dispatcher = Arc::clone(&self);
            let handler = Arc::clone(&handler);
            workers.push(tokio::spawn(async move {
                dispatcher.worker_loop(worker_id, handler).await;
            }));
        }
    }

    /// Queues a packet context; wakes one worker.
    pub fn enqueue(&self, ctx: PacketContext) {
        let item = QueuedItem {
            priority: ctx.priority,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            ctx,
        };
        self.queue
            .lock()
            .expect("dispatcher lock poisoned")
            .push(item);
        self.available.add_permits(1);
    }

    /// Pending item count (items queued, not yet claimed by a worker).
    pub fn pending(&self) -> usize {
        self.queue.lock().expect("dispatcher lock poisoned").len()
    }

    /// Releases every worker; no further work is dispatched.
    pub fn close(&self) {
        self.available.close();
    }

    async fn worker_loop(&self, worker_id: usize, handler: Arc<dyn PacketHandler>) {
        loop {
            let permit = match self.available.acquire().await {
                Ok(permit) => permit,
                // Semaphore closed: shutdown.
                Err(_) => break,
            };
            permit.forget();

            let item = self
                .queue
                .lock()
                .expect("dispatcher lock poisoned")
                .pop();
            let Some(item) = item else {
                continue;
            };

            if let Err(e) = handler.handle(item.ctx).await {
                // Handler failures are swallowed; the worker keeps running.
                error!("worker {}: handler error: {}", worker_id, e);
            }
        }
        debug!("dispatch worker {} stopped", worker_id);
    }
}

impl Default for PacketDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
