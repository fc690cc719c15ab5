//! End-to-end tests over real TCP sockets.
//!
//! Each test boots a full server on an ephemeral port with short timeouts,
//! then drives it with a minimal protocol-speaking client.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use shared::{frame, FrameCodec, ObjectKind, Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

use server::auth::{Authenticator, MemoryAuthenticator};
use server::config::ServerConfig;
use server::descriptor::{MapDescriptor, MonsterSpawn, Position};
use server::network::GameServer;

/// Boots a server with the given config and map; registers the users.
async fn start_server(
    config: ServerConfig,
    descriptor: MapDescriptor,
    users: &[(&str, &str)],
) -> (SocketAddr, Arc<GameServer>) {
    let auth = Arc::new(MemoryAuthenticator::new());
    for (username, password) in users {
        auth.register(username, password).await.unwrap();
    }
    let server = Arc::new(GameServer::new(
        config,
        descriptor,
        auth as Arc<dyn Authenticator>,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = runner.run_with_listener(listener).await;
    });
    sleep(Duration::from_millis(30)).await;
    (addr, server)
}

fn bare_map() -> MapDescriptor {
    let mut descriptor = MapDescriptor::default_map();
    descriptor.monster_spawns.clear();
    descriptor
}

fn single_monster_map(x: f32, z: f32) -> MapDescriptor {
    let mut descriptor = bare_map();
    descriptor.monster_spawns = vec![MonsterSpawn {
        monster_type: "husk".to_string(),
        position: Position::new(x, 0.0, z),
        count: 1,
        respawn_seconds: 0.0,
        spawn_radius: 0.0,
        level: None,
        hp: None,
        move_speed: None,
        detect_range: None,
        attack_range: None,
        patrol: false,
        patrol_radius: 0.0,
    }];
    descriptor
}

/// A protocol-speaking test client.
struct TestClient {
    stream: TcpStream,
    codec: FrameCodec,
    inbox: VecDeque<Packet>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        stream.set_nodelay(true).unwrap();
        Self {
            stream,
            codec: FrameCodec::new(),
            inbox: VecDeque::new(),
        }
    }

    async fn send(&mut self, packet: &Packet) {
        self.stream
            .write_all(&frame(&packet.encode()))
            .await
            .unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Next packet within the timeout, or None. Also returns None on EOF.
    async fn recv(&mut self, timeout: Duration) -> Option<Packet> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(packet) = self.inbox.pop_front() {
                return Some(packet);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let mut buf = [0u8; 4096];
            let n = match tokio::time::timeout(remaining, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => return None,
                Ok(Ok(n)) => n,
                Ok(Err(_)) => return None,
                Err(_) => return None,
            };
            self.codec.append(&buf[..n]);
            for body in self.codec.extract().unwrap() {
                self.inbox.push_back(Packet::decode(&body).unwrap());
            }
        }
    }

    /// First packet matching the predicate within the timeout. Skipped
    /// packets are kept in arrival order for later assertions.
    async fn recv_matching<F>(&mut self, timeout: Duration, mut pred: F) -> Option<Packet>
    where
        F: FnMut(&Packet) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut skipped = Vec::new();
        let result = loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break None;
            };
            match self.recv(remaining).await {
                Some(packet) if pred(&packet) => break Some(packet),
                Some(packet) => skipped.push(packet),
                None => break None,
            }
        };
        for packet in skipped.into_iter().rev() {
            self.inbox.push_front(packet);
        }
        result
    }

    /// Logs in and returns the token, panicking on failure.
    async fn login(&mut self, username: &str, password: &str) -> String {
        self.send(&Packet::LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await;
        let response = self
            .recv_matching(Duration::from_secs(2), |p| {
                matches!(p, Packet::LoginResponse { .. })
            })
            .await
            .expect("login response");
        match response {
            Packet::LoginResponse {
                success: true,
                token,
                ..
            } => token,
            other => panic!("login failed: {:?}", other),
        }
    }

    /// True when the server has closed the connection (clean EOF with no
    /// pending frames).
    async fn at_eof(&mut self, timeout: Duration) -> bool {
        if !self.inbox.is_empty() {
            return false;
        }
        let mut buf = [0u8; 64];
        match tokio::time::timeout(timeout, self.stream.read(&mut buf)).await {
            Ok(Ok(0)) => true,
            Ok(Ok(n)) => {
                self.codec.append(&buf[..n]);
                for body in self.codec.extract().unwrap() {
                    self.inbox.push_back(Packet::decode(&body).unwrap());
                }
                false
            }
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }
}

#[tokio::test]
async fn login_yields_token_and_world_snapshot() {
    // Default map: ten monsters along the diagonal, three inside the
    // 50-unit view from the origin spawn.
    let (addr, _server) =
        start_server(ServerConfig::default(), MapDescriptor::default_map(), &[("alice", "pw")])
            .await;

    let mut client = TestClient::connect(addr).await;
    let token = client.login("alice", "pw").await;
    assert!(!token.is_empty());

    let snapshot = client
        .recv_matching(Duration::from_secs(2), |p| {
            matches!(p, Packet::ObjectSnapshot { .. })
        })
        .await
        .expect("initial snapshot");
    let Packet::ObjectSnapshot { entries } = snapshot else {
        unreachable!()
    };
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.kind == ObjectKind::Monster));
    assert!(entries.iter().all(|e| e.id >= 10_000));
}

#[tokio::test]
async fn bad_credentials_leave_session_open() {
    let (addr, server) =
        start_server(ServerConfig::default(), bare_map(), &[("alice", "pw")]).await;

    let mut client = TestClient::connect(addr).await;
    client
        .send(&Packet::LoginRequest {
            username: "alice".to_string(),
            password: "wrong".to_string(),
        })
        .await;
    let response = client
        .recv_matching(Duration::from_secs(2), |p| {
            matches!(p, Packet::LoginResponse { .. })
        })
        .await
        .unwrap();
    assert!(matches!(
        response,
        Packet::LoginResponse { success: false, .. }
    ));

    // The session survives the failure and can retry.
    let token = client.login("alice", "pw").await;
    assert!(!token.is_empty());
    assert_eq!(server.active_sessions(), 1);
}

#[tokio::test]
async fn second_login_is_broadcast_to_neighbors() {
    let (addr, _server) = start_server(
        ServerConfig::default(),
        bare_map(),
        &[("alice", "pw"), ("bob", "pw")],
    )
    .await;

    let mut a = TestClient::connect(addr).await;
    a.login("alice", "pw").await;

    let mut b = TestClient::connect(addr).await;
    b.login("bob", "pw").await;

    // Both avatars share the spawn point, so A's view gains B's character.
    let spawn = a
        .recv_matching(Duration::from_secs(2), |p| {
            matches!(
                p,
                Packet::ObjectSpawn {
                    kind: ObjectKind::Character,
                    ..
                }
            )
        })
        .await
        .expect("spawn broadcast for the second character");
    let Packet::ObjectSpawn { id, .. } = spawn else {
        unreachable!()
    };
    assert!(id < 10_000);
}

#[tokio::test]
async fn movement_propagates_as_position_updates() {
    let (addr, _server) = start_server(
        ServerConfig::default(),
        bare_map(),
        &[("alice", "pw"), ("bob", "pw")],
    )
    .await;

    let mut a = TestClient::connect(addr).await;
    a.login("alice", "pw").await;
    let mut b = TestClient::connect(addr).await;
    b.login("bob", "pw").await;

    a.send(&Packet::MoveRequest {
        x: 10.0,
        y: 0.0,
        z: 0.0,
    })
    .await;

    // B sees at least one position-flagged update quickly.
    let first = b
        .recv_matching(Duration::from_secs(1), |p| {
            matches!(p, Packet::ObjectUpdate { position: Some(_), .. })
        })
        .await
        .expect("position update within a few ticks");
    let Packet::ObjectUpdate {
        position: Some((x, _, _)),
        ..
    } = first
    else {
        unreachable!()
    };
    assert!(x > 0.0);

    // At 5 units/s the walk finishes in 2 s; the final update lands on the
    // exact target.
    let arrived = b
        .recv_matching(Duration::from_secs(4), |p| {
            matches!(
                p,
                Packet::ObjectUpdate {
                    position: Some((x, _, _)),
                    ..
                } if (*x - 10.0).abs() < f32::EPSILON
            )
        })
        .await;
    assert!(arrived.is_some(), "mover should reach the target");
}

#[tokio::test]
async fn interest_horizon_hides_then_reveals_far_monster() {
    // Monster just outside the 50-unit radius from spawn.
    let (addr, _server) = start_server(
        ServerConfig::default(),
        single_monster_map(54.0, 0.0),
        &[("alice", "pw")],
    )
    .await;

    let mut client = TestClient::connect(addr).await;
    client.login("alice", "pw").await;

    let snapshot = client
        .recv_matching(Duration::from_secs(2), |p| {
            matches!(p, Packet::ObjectSnapshot { .. })
        })
        .await
        .unwrap();
    let Packet::ObjectSnapshot { entries } = snapshot else {
        unreachable!()
    };
    assert!(entries.is_empty(), "monster at 54 units must not be visible");

    // No spawn arrives while standing still.
    let early = client
        .recv_matching(Duration::from_millis(700), |p| {
            matches!(p, Packet::ObjectSpawn { .. })
        })
        .await;
    assert!(early.is_none());

    // Walk toward it; at (10, 0, 0) the distance is 44 < 50.
    client
        .send(&Packet::MoveRequest {
            x: 10.0,
            y: 0.0,
            z: 0.0,
        })
        .await;
    let spawn = client
        .recv_matching(Duration::from_secs(5), |p| {
            matches!(
                p,
                Packet::ObjectSpawn {
                    kind: ObjectKind::Monster,
                    ..
                }
            )
        })
        .await;
    assert!(spawn.is_some(), "monster should enter the view");
}

#[tokio::test]
async fn reconnect_within_grace_restores_character() {
    let config = ServerConfig {
        reconnect_grace: Duration::from_secs(5),
        park_sweep_interval: Duration::from_millis(200),
        ..ServerConfig::default()
    };
    let (addr, server) = start_server(config, bare_map(), &[("alice", "pw"), ("bob", "pw")]).await;

    let mut a = TestClient::connect(addr).await;
    let token = a.login("alice", "pw").await;
    a.send(&Packet::MoveRequest {
        x: 2.0,
        y: 0.0,
        z: 2.0,
    })
    .await;
    sleep(Duration::from_millis(900)).await;

    // Transport drops without a logout.
    drop(a);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(server.service().parked_count(), 1);

    let mut a2 = TestClient::connect(addr).await;
    a2.send(&Packet::ReconnectRequest {
        token: token.clone(),
        username: "alice".to_string(),
    })
    .await;
    let response = a2
        .recv_matching(Duration::from_secs(2), |p| {
            matches!(p, Packet::ReconnectResponse { .. })
        })
        .await
        .unwrap();
    let Packet::ReconnectResponse {
        success, message, ..
    } = response
    else {
        unreachable!()
    };
    assert!(success);
    assert_eq!(message, "session restored");
    assert_eq!(server.service().parked_count(), 0);

    // A neighbor logging in now sees the restored avatar near (2, 0, 2).
    let mut b = TestClient::connect(addr).await;
    b.login("bob", "pw").await;
    let snapshot = b
        .recv_matching(Duration::from_secs(2), |p| {
            matches!(p, Packet::ObjectSnapshot { .. })
        })
        .await
        .unwrap();
    let Packet::ObjectSnapshot { entries } = snapshot else {
        unreachable!()
    };
    let restored = entries
        .iter()
        .find(|e| e.kind == ObjectKind::Character)
        .expect("restored character visible");
    assert!((restored.x - 2.0).abs() < 0.5);
    assert!((restored.z - 2.0).abs() < 0.5);
}

#[tokio::test]
async fn reconnect_after_grace_starts_fresh() {
    let config = ServerConfig {
        reconnect_grace: Duration::from_millis(400),
        park_sweep_interval: Duration::from_millis(100),
        ..ServerConfig::default()
    };
    let (addr, server) = start_server(config, bare_map(), &[("alice", "pw")]).await;

    let mut a = TestClient::connect(addr).await;
    let token = a.login("alice", "pw").await;
    drop(a);

    // Wait out the grace window plus a sweep.
    sleep(Duration::from_millis(800)).await;
    assert_eq!(server.service().parked_count(), 0);

    let mut a2 = TestClient::connect(addr).await;
    a2.send(&Packet::ReconnectRequest {
        token,
        username: "alice".to_string(),
    })
    .await;
    let response = a2
        .recv_matching(Duration::from_secs(2), |p| {
            matches!(p, Packet::ReconnectResponse { .. })
        })
        .await
        .unwrap();
    let Packet::ReconnectResponse {
        success, message, ..
    } = response
    else {
        unreachable!()
    };
    assert!(success);
    assert!(message.contains("new game"));
}

#[tokio::test]
async fn connection_cap_closes_extra_clients_silently() {
    let config = ServerConfig {
        max_connections: 2,
        ..ServerConfig::default()
    };
    let (addr, server) = start_server(config, bare_map(), &[("alice", "pw"), ("bob", "pw")]).await;

    let mut a = TestClient::connect(addr).await;
    a.login("alice", "pw").await;
    let mut b = TestClient::connect(addr).await;
    b.login("bob", "pw").await;
    assert_eq!(server.active_sessions(), 2);

    // The third connection is accepted at the socket level, then closed
    // with no reply frame.
    let mut c = TestClient::connect(addr).await;
    assert!(c.at_eof(Duration::from_secs(1)).await);
    assert!(c.inbox.is_empty());
    assert_eq!(server.active_sessions(), 2);
}

#[tokio::test]
async fn idle_session_is_dropped_by_liveness_monitor() {
    let config = ServerConfig {
        heartbeat_check_interval: Duration::from_millis(300),
        liveness_timeout: Duration::from_secs(1),
        ..ServerConfig::default()
    };
    let (addr, server) = start_server(config, bare_map(), &[]).await;

    let mut client = TestClient::connect(addr).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.active_sessions(), 1);

    // Send nothing; the monitor reaps the session after the timeout.
    assert!(client.at_eof(Duration::from_secs(3)).await);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.active_sessions(), 0);
}

#[tokio::test]
async fn heartbeats_keep_an_idle_session_alive() {
    let config = ServerConfig {
        heartbeat_check_interval: Duration::from_millis(200),
        liveness_timeout: Duration::from_millis(800),
        ..ServerConfig::default()
    };
    let (addr, server) = start_server(config, bare_map(), &[]).await;

    let mut client = TestClient::connect(addr).await;
    for _ in 0..8 {
        client.send(&Packet::Heartbeat).await;
        sleep(Duration::from_millis(250)).await;
    }
    assert_eq!(server.active_sessions(), 1);
}

#[tokio::test]
async fn oversize_frame_disconnects_the_session() {
    let (addr, server) = start_server(ServerConfig::default(), bare_map(), &[]).await;

    let mut client = TestClient::connect(addr).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.active_sessions(), 1);

    // Announce a 2 MiB frame; the cap is 1 MiB.
    client
        .stream
        .write_all(&(2 * 1024 * 1024u32).to_le_bytes())
        .await
        .unwrap();
    client.stream.flush().await.unwrap();

    assert!(client.at_eof(Duration::from_secs(2)).await);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.active_sessions(), 0);
}

#[tokio::test]
async fn unknown_packet_id_disconnects_the_session() {
    let (addr, server) = start_server(ServerConfig::default(), bare_map(), &[]).await;

    let mut client = TestClient::connect(addr).await;
    sleep(Duration::from_millis(50)).await;

    // Well-formed frame, nonsense packet id.
    client
        .stream
        .write_all(&frame(&4242u16.to_le_bytes()))
        .await
        .unwrap();
    client.stream.flush().await.unwrap();

    assert!(client.at_eof(Duration::from_secs(2)).await);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.active_sessions(), 0);
}
