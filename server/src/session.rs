//! One TCP connection: identity, outbound queue, and both I/O loops.
//!
//! A session owns its socket. The read loop feeds bytes through the frame
//! codec, decodes typed packets, stamps activity, and hands everything but
//! heartbeats to the dispatcher. The write loop drains a bounded FIFO of
//! pre-encoded bodies, length-prefixing each one. Producers of outbound
//! packets block when the queue is full; that is the backpressure policy.
//!
//! `disconnect` is idempotent: the first call flips the connected flag and
//! signals both loops, every later call is a no-op, and the disconnect
//! event (registry removal, character parking) fires exactly once in the
//! connection task that owns the loops.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use shared::{FrameCodec, Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::dispatch::{PacketContext, PacketDispatcher};

/// Socket buffer size requested for both directions.
const SOCKET_BUF_SIZE: usize = 64 * 1024;
/// Keepalive idle time before the first probe.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);
/// Interval between keepalive probes.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
/// Probes before the connection is declared dead.
#[cfg(any(target_os = "linux", target_os = "windows"))]
const KEEPALIVE_RETRIES: u32 = 3;

/// Server-side handle for one client connection.
pub struct Session {
    id: String,
    addr: SocketAddr,
    outbound: mpsc::Sender<Vec<u8>>,
    connected: AtomicBool,
    last_activity: Mutex<Instant>,
    closed_tx: watch::Sender<bool>,
}

impl Session {
    /// Creates a session with a bounded outbound queue. Returns the session
    /// plus the receiver half of the queue and the close signal, both owned
    /// by the write/read loops.
    pub fn new(
        addr: SocketAddr,
        queue_len: usize,
    ) -> (Arc<Session>, mpsc::Receiver<Vec<u8>>, watch::Receiver<bool>) {
        let (outbound, outbound_rx) = mpsc::channel(queue_len);
        let (closed_tx, closed_rx) = watch::channel(false);
        let session = Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            addr,
            outbound,
            connected: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            closed_tx,
        });
        (session, outbound_rx, closed_rx)
    }

    /// Opaque session token generated at accept time.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Refreshes the last-activity timestamp.
    pub fn touch(&self) {
        *self.last_activity.lock().expect("activity lock poisoned") = Instant::now();
    }

    /// Time since the last received byte.
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .expect("activity lock poisoned")
            .elapsed()
    }

    /// Encodes and queues a packet for the write loop. Blocks while the
    /// queue is full. Returns false when the session is already closed;
    /// sends after disconnect are silent no-ops.
    pub async fn send(&self, packet: &Packet) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.outbound.send(packet.encode()).await.is_ok()
    }

    /// Signals both loops to stop and marks the session closed. Idempotent;
    /// only the first call has any effect.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!("session {} disconnecting", self.id);
            let _ = self.closed_tx.send(true);
        }
    }
}

/// Applies per-connection socket tuning: Nagle off, 64 KiB buffers, TCP
/// keepalive. Best-effort; the caller logs and continues on failure.
pub fn configure_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;

    let sock = socket2::SockRef::from(stream);
    sock.set_recv_buffer_size(SOCKET_BUF_SIZE)?;
    sock.set_send_buffer_size(SOCKET_BUF_SIZE)?;

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    #[cfg(any(target_os = "linux", target_os = "windows"))]
    let keepalive = keepalive.with_retries(KEEPALIVE_RETRIES);
    sock.set_tcp_keepalive(&keepalive)?;

    Ok(())
}

/// Reads frames off the socket until EOF, error, protocol violation, or
/// disconnect. Heartbeats are consumed inline; all other packets go to the
/// dispatcher with their class priority.
pub async fn run_read_loop(
    session: Arc<Session>,
    mut reader: OwnedReadHalf,
    dispatcher: Arc<PacketDispatcher>,
    mut closed_rx: watch::Receiver<bool>,
) {
    let mut codec = FrameCodec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = tokio::select! {
            result = reader.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("session {} read error: {}", session.id(), e);
                    break;
                }
            },
            _ = closed_rx.changed() => break,
        };

        session.touch();
        codec.append(&buf[..n]);

        let bodies = match codec.extract() {
            Ok(bodies) => bodies,
            Err(e) => {
                warn!("session {} protocol error: {}", session.id(), e);
                break;
            }
        };

        let mut broken = false;
        for body in bodies {
            match Packet::decode(&body) {
                Ok(Packet::Heartbeat) => {
                    // Activity already stamped above; nothing to dispatch.
                }
                Ok(packet) => {
                    let priority = packet.priority();
                    dispatcher.enqueue(PacketContext {
                        session: Arc::clone(&session),
                        packet,
                        received_at: Instant::now(),
                        priority,
                    });
                }
                Err(e) => {
                    warn!("session {} sent malformed packet: {}", session.id(), e);
                    broken = true;
                    break;
                }
            }
        }
        if broken {
            break;
        }
    }

    session.disconnect();
}

/// Writes queued bodies as length-prefixed frames, in queue order, flushing
/// after each one. Exits on queue close, write error, or disconnect.
pub async fn run_write_loop(
    session: Arc<Session>,
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    mut closed_rx: watch::Receiver<bool>,
) {
    loop {
        let body = tokio::select! {
            maybe = outbound_rx.recv() => match maybe {
                Some(body) => body,
                None => break,
            },
            _ = closed_rx.changed() => break,
        };

        let wire = shared::frame(&body);
        if let Err(e) = writer.write_all(&wire).await {
            warn!("session {} write error: {}", session.id(), e);
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!("session {} flush error: {}", session.id(), e);
            break;
        }
    }

    session.disconnect();
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[tokio::test]
    async fn test_session_has_unique_token() {
        let (s1, _rx1, _c1) = Session::new(test_addr(), 8);
        let (s2, _rx2, _c2) = Session::new(test_addr(), 8);
        assert_ne!(s1.id(), s2.id());
        assert!(!s1.id().is_empty());
    }

    #[tokio::test]
    async fn test_send_queues_encoded_body() {
        let (session, mut rx, _closed) = Session::new(test_addr(), 8);
        assert!(session.send(&Packet::Heartbeat).await);
        let body = rx.recv().await.unwrap();
        assert_eq!(Packet::decode(&body).unwrap(), Packet::Heartbeat);
    }

    #[tokio::test]
    async fn test_send_after_disconnect_is_noop() {
        let (session, mut rx, _closed) = Session::new(test_addr(), 8);
        session.disconnect();
        assert!(!session.send(&Packet::Heartbeat).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (session, _rx, closed) = Session::new(test_addr(), 8);
        assert!(session.is_connected());
        session.disconnect();
        session.disconnect();
        session.disconnect();
        assert!(!session.is_connected());
        assert!(*closed.borrow());
    }

    #[tokio::test]
    async fn test_touch_resets_idle_timer() {
        let (session, _rx, _closed) = Session::new(test_addr(), 8);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.idle_for() >= Duration::from_millis(25));
        session.touch();
        assert!(session.idle_for() < Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_write_loop_frames_bodies_in_order() {
        let (session, outbound_rx, closed_rx) = Session::new(test_addr(), 8);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let (_read_half, write_half) = server_stream.into_split();

        let writer_session = Arc::clone(&session);
        tokio::spawn(run_write_loop(
            writer_session,
            write_half,
            outbound_rx,
            closed_rx,
        ));

        session.send(&Packet::ObjectDespawn { id: 1 }).await;
        session.send(&Packet::ObjectDespawn { id: 2 }).await;

        let mut codec = FrameCodec::new();
        let mut client = client;
        let mut got = Vec::new();
        let mut buf = [0u8; 256];
        while got.len() < 2 {
            let n = client.read(&mut buf).await.unwrap();
            codec.append(&buf[..n]);
            for body in codec.extract().unwrap() {
                got.push(Packet::decode(&body).unwrap());
            }
        }
        assert_eq!(
            got,
            vec![
                Packet::ObjectDespawn { id: 1 },
                Packet::ObjectDespawn { id: 2 }
            ]
        );
    }
}
