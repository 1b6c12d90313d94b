//! Core game server implementation.
//!
//! This module contains the main `GameServer` struct and its
//! implementation: network binding, the accept loop with admission
//! enforcement, the admission maintenance sweep, and shutdown
//! coordination. Per-connection work is delegated to
//! [`handlers::handle_connection`](super::handlers::handle_connection).

use crate::{
    admission::{Admission, AdmissionController},
    config::ServerConfig,
    dispatch::DispatchTable,
    error::ServerError,
    realm::Realms,
    server::{handlers::handle_connection, ShutdownState},
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// The core game server structure.
///
/// `GameServer` owns the pieces of the network core - admission
/// controller, the four realm instances, and the dispatch table - and
/// runs the accept loop that turns admitted sockets into sessions. It
/// contains no gameplay logic; gameplay handlers are registered into the
/// dispatch table before construction.
pub struct GameServer {
    /// Server configuration settings
    config: Arc<ServerConfig>,

    /// Per-address rate limiting and blocking
    admission: Arc<AdmissionController>,

    /// The four parallel world instances
    realms: Arc<Realms>,

    /// Type-code -> handler mapping, immutable after startup
    dispatch: Arc<DispatchTable>,

    /// Source of server-assigned session ids
    next_session_id: Arc<AtomicU64>,

    /// Live connection count, checked against the capacity ceiling
    live_connections: Arc<AtomicUsize>,

    /// Channel for coordinating internal shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl GameServer {
    /// Creates a new game server from a configuration and a fully built
    /// dispatch table.
    pub fn new(config: ServerConfig, dispatch: DispatchTable) -> Self {
        let admission = Arc::new(AdmissionController::new(config.admission.clone()));
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            admission,
            realms: Arc::new(Realms::new()),
            dispatch: Arc::new(dispatch),
            next_session_id: Arc::new(AtomicU64::new(1)),
            live_connections: Arc::new(AtomicUsize::new(0)),
            shutdown_sender,
        }
    }

    /// Starts the server and accepts connections until shutdown.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_internal(None).await
    }

    /// Starts the server with graceful-shutdown coordination.
    ///
    /// The accept loop and the admission sweep stop once the provided
    /// shutdown state is initiated.
    pub async fn start_with_shutdown_state(
        &self,
        shutdown_state: ShutdownState,
    ) -> Result<(), ServerError> {
        self.start_internal(Some(shutdown_state)).await
    }

    async fn start_internal(
        &self,
        shutdown_state: Option<ShutdownState>,
    ) -> Result<(), ServerError> {
        info!("🚀 Starting game server on {}", self.config.bind_address);
        info!(
            "🗺️ Realms online: normal, dungeon, event, pvp | capacity {} sessions",
            self.admission.max_connections()
        );
        info!("🧭 Dispatch table: {} handler(s) registered", self.dispatch.len());

        self.start_admission_sweep(shutdown_state.clone());

        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("bind {} failed: {e}", self.config.bind_address)))?;
        info!("✅ Listening on {}", self.config.bind_address);

        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        loop {
            if let Some(ref state) = shutdown_state {
                if state.is_shutdown_initiated() {
                    info!("🛑 Accept loop stopping - shutdown initiated");
                    break;
                }
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.on_accept(stream, addr),
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        break;
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("Internal shutdown signal received");
                    break;
                }
            }
        }

        info!("🧹 Performing server cleanup...");
        info!("Server stopped");
        Ok(())
    }

    /// Runs one accepted socket through admission and, if admitted,
    /// promotes it to a session with its own connection task.
    fn on_accept(&self, stream: TcpStream, addr: std::net::SocketAddr) {
        let live = self.live_connections.load(Ordering::SeqCst);
        match self.admission.admit(addr.ip(), live) {
            Admission::Accept => {
                self.live_connections.fetch_add(1, Ordering::SeqCst);
                let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                info!("🔗 Connection {} from {} ({} live)", session_id, addr, live + 1);

                let realms = self.realms.clone();
                let dispatch = self.dispatch.clone();
                let config = self.config.clone();
                let live_connections = self.live_connections.clone();

                tokio::spawn(async move {
                    if let Err(e) =
                        handle_connection(stream, addr, session_id, realms, dispatch, config).await
                    {
                        error!("Connection {} error: {:?}", session_id, e);
                    }
                    live_connections.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Admission::Reject(reason) => {
                warn!("🚷 Rejected connection from {}: {}", addr, reason);
                tokio::spawn(refuse(stream, reason.to_string()));
            }
        }
    }

    /// Spawns the minute-interval maintenance sweep over the admission
    /// maps. Runs independently of connection activity and shares the
    /// hot path's concurrent maps, so it never stalls new admissions.
    fn start_admission_sweep(&self, shutdown_state: Option<ShutdownState>) {
        let admission = self.admission.clone();
        let sweep_interval = self.config.admission.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            loop {
                ticker.tick().await;
                if let Some(ref state) = shutdown_state {
                    if state.is_shutdown_initiated() {
                        break;
                    }
                }
                admission.sweep();
                debug!(
                    "🧽 Admission sweep: {} blocked, {} tracked addresses",
                    admission.blocked_count(),
                    admission.tracked_count()
                );
            }
        });
    }

    /// Initiates internal server shutdown.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    /// The four realm instances, for the gameplay layer.
    pub fn realms(&self) -> Arc<Realms> {
        self.realms.clone()
    }

    /// The admission controller.
    pub fn admission(&self) -> Arc<AdmissionController> {
        self.admission.clone()
    }

    /// The dispatch table.
    pub fn dispatch(&self) -> Arc<DispatchTable> {
        self.dispatch.clone()
    }

    /// Current number of live connections.
    pub fn live_connections(&self) -> usize {
        self.live_connections.load(Ordering::SeqCst)
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Writes a short rejection notice and shuts the socket down in order.
/// The half-open connection never reaches the session registries.
async fn refuse(mut stream: TcpStream, notice: String) {
    if let Err(e) = stream.write_all(notice.as_bytes()).await {
        debug!("Failed to write rejection notice: {}", e);
    }
    let _ = stream.shutdown().await;
}
