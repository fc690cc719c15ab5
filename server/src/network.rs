//! Listener, accept loop, and top-level lifecycle.
//!
//! `GameServer` owns every long-running piece: the connection registry, the
//! dispatch workers, the map tick loop, the liveness monitor, and the
//! parked-character sweeper. Shutdown is built top-down: the listener stops
//! first, then the background loops observe the shared watch channel, the
//! dispatcher releases its workers, and finally every session is
//! disconnected with a bounded wait for the connection tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::descriptor::MapDescriptor;
use crate::dispatch::{PacketDispatcher, PacketHandler};
use crate::game::{run_park_sweeper, GameService};
use crate::liveness::run_liveness_monitor;
use crate::map::{run_tick_loop, GameMap, TickObserver};
use crate::pool::ObjectPool;
use crate::registry::ConnectionRegistry;
use crate::session::{configure_stream, run_read_loop, run_write_loop, Session};

/// How long shutdown waits for connection tasks before aborting them.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// The assembled server.
pub struct GameServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<PacketDispatcher>,
    service: Arc<GameService>,
    map: Arc<GameMap>,
    shutdown_tx: watch::Sender<bool>,
}

impl GameServer {
    pub fn new(
        config: ServerConfig,
        descriptor: MapDescriptor,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let pool = Arc::new(ObjectPool::default());
        let map = GameMap::from_descriptor(
            descriptor,
            config.cell_size,
            config.tick_period,
            Arc::clone(&pool),
        );
        let service = GameService::new(config.clone(), auth, Arc::clone(&map), pool);
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            registry,
            dispatcher: Arc::new(PacketDispatcher::new()),
            service,
            map,
            shutdown_tx,
        }
    }

    pub fn service(&self) -> &Arc<GameService> {
        &self.service
    }

    pub fn map(&self) -> &Arc<GameMap> {
        &self.map
    }

    /// Connected session count, the figure liveness tests watch.
    pub fn active_sessions(&self) -> usize {
        self.registry.active_count()
    }

    /// Signals every loop to stop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = Self::create_listener(self.config.bind_addr).await?;
        info!("listening on {}", self.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Creates the server socket with `SO_REUSEADDR` before binding.
    async fn create_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
        let domain = if addr.is_ipv6() {
            socket2::Domain::IPV6
        } else {
            socket2::Domain::IPV4
        };
        let socket = socket2::Socket::new(
            domain,
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        TcpListener::from_std(socket.into())
    }

    /// Serves on a pre-bound listener (tests bind their own ephemeral
    /// ports).
    pub async fn run_with_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();

        Arc::clone(&self.dispatcher).start(
            Arc::clone(&self.service) as Arc<dyn PacketHandler>,
            self.config.worker_count,
        );
        tokio::spawn(run_tick_loop(
            Arc::clone(&self.map),
            Arc::clone(&self.service) as Arc<dyn TickObserver>,
            shutdown_rx.clone(),
        ));
        tokio::spawn(run_liveness_monitor(
            Arc::clone(&self.registry),
            self.config.heartbeat_check_interval,
            self.config.liveness_timeout,
            shutdown_rx.clone(),
        ));
        tokio::spawn(run_park_sweeper(
            Arc::clone(&self.service),
            shutdown_rx.clone(),
        ));

        let mut connection_tasks = JoinSet::new();
        let mut shutdown_rx = shutdown_rx;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    self.accept_connection(stream, peer, &mut connection_tasks);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        drop(listener);
        info!("listener stopped, draining sessions");

        self.dispatcher.close();
        for session in self.registry.all() {
            session.disconnect();
        }

        let drained = tokio::time::timeout(SHUTDOWN_WAIT, async {
            while connection_tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("shutdown wait elapsed, aborting remaining connection tasks");
            connection_tasks.abort_all();
        }
        info!("server stopped");
        Ok(())
    }

    fn accept_connection(
        &self,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        connection_tasks: &mut JoinSet<()>,
    ) {
        if let Err(e) = configure_stream(&stream) {
            // Tuning is best-effort; the connection still works without it.
            warn!("socket tuning failed for {}: {}", peer, e);
        }

        let (session, outbound_rx, closed_rx) = Session::new(peer, self.config.send_queue_len);
        if !self.registry.try_add(Arc::clone(&session)) {
            warn!("connection cap reached, refusing {}", peer);
            // Close with nothing written: the peer sees a clean EOF.
            drop(stream);
            return;
        }
        self.service.register_session(Arc::clone(&session));
        info!("accepted {} as session {}", peer, session.id());

        let (read_half, write_half) = stream.into_split();
        let dispatcher = Arc::clone(&self.dispatcher);
        let registry = Arc::clone(&self.registry);
        let service = Arc::clone(&self.service);

        connection_tasks.spawn(async move {
            let reader = tokio::spawn(run_read_loop(
                Arc::clone(&session),
                read_half,
                dispatcher,
                closed_rx.clone(),
            ));
            let writer = tokio::spawn(run_write_loop(
                Arc::clone(&session),
                write_half,
                outbound_rx,
                closed_rx,
            ));
            let _ = reader.await;
            let _ = writer.await;

            session.disconnect();
            registry.remove(session.id());
            service.on_session_closed(session.id()).await;
        });
    }
}
