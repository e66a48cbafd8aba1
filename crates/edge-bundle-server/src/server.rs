//! HTTP server implementation.
//!
//! This module provides the main [`EdgeServer`] struct for running the
//! edge-bundle HTTP server.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use edge_bundle_common::{AdminConfig, ConfigFile, RuntimeError, ServerConfigFile};
use edge_bundle_core::WasmEngine;

use crate::router::{AdminRouterConfig, build_router_with_admin};
use crate::state::AppState;

/// Period of the epoch ticker. Execution timeouts count these ticks.
pub const EPOCH_TICK: Duration = Duration::from_millis(1);

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout_secs: 30,
            graceful_shutdown: true,
        }
    }
}

impl ServerConfig {
    /// Create a new server config with custom bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Create a new server config with custom timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TryFrom<&ServerConfigFile> for ServerConfig {
    type Error = RuntimeError;

    fn try_from(file: &ServerConfigFile) -> Result<Self, Self::Error> {
        let bind_addr = file.bind_addr.parse().map_err(|e| {
            RuntimeError::invalid_config(format!("Invalid bind address '{}': {e}", file.bind_addr))
        })?;

        Ok(Self {
            bind_addr,
            request_timeout_secs: file.request_timeout_secs,
            graceful_shutdown: file.graceful_shutdown,
        })
    }
}

/// Admin router settings from the config file, if the API is enabled and
/// has a token.
fn admin_router_config(admin: &AdminConfig) -> Option<AdminRouterConfig> {
    if admin.enabled && !admin.is_configured() {
        warn!("Admin API enabled without a token; not mounting it");
    }

    admin.is_configured().then(|| AdminRouterConfig {
        prefix: admin.prefix.clone(),
        token: admin.token.clone().unwrap_or_default(),
    })
}

/// edge-bundle HTTP server.
///
/// # Example
///
/// ```ignore
/// use edge_bundle_common::ConfigFile;
/// use edge_bundle_server::EdgeServer;
///
/// let config = ConfigFile::from_file("edge.toml")?;
/// let server = EdgeServer::from_config(&config).await?;
/// server.run().await?;
/// ```
pub struct EdgeServer {
    /// Application state.
    state: AppState,
    /// Server configuration.
    config: ServerConfig,
    /// Admin API settings, if mounted.
    admin: Option<AdminRouterConfig>,
}

impl EdgeServer {
    /// Create a server over prepared state.
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        Self {
            state,
            config,
            admin: None,
        }
    }

    /// Mount the Admin API.
    #[must_use]
    pub fn with_admin(mut self, admin: AdminRouterConfig) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Build state and server settings from a config file. The guest is
    /// instantiated here.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is invalid or the runtime cannot
    /// be created.
    pub async fn from_config(config: &ConfigFile) -> Result<Self, RuntimeError> {
        let server_config = ServerConfig::try_from(&config.server)?;
        let state = AppState::from_config(config).await?;

        Ok(Self {
            state,
            config: server_config,
            admin: admin_router_config(&config.admin),
        })
    }

    /// Get a reference to the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until shutdown.
    ///
    /// This will block until the server is shut down via signal
    /// (SIGTERM/SIGINT) if graceful shutdown is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the address.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let ticker = spawn_epoch_ticker(self.state.runtime().engine());
        let app = build_router_with_admin(self.state, self.config.request_timeout(), self.admin);

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to bind: {e}")))?;

        info!(addr = %self.config.bind_addr, "Starting HTTP server");

        let result = if self.config.graceful_shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        } else {
            axum::serve(listener, app).await
        };

        if let Some(ticker) = ticker {
            ticker.abort();
        }
        result.map_err(|e| RuntimeError::invalid_config(format!("Server error: {e}")))?;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start a server on an ephemeral port (127.0.0.1:0) and return a
    /// handle for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start_test(state: AppState) -> Result<TestHandle, RuntimeError> {
        let ticker = spawn_epoch_ticker(state.runtime().engine());
        let app = build_router_with_admin(state.clone(), Duration::from_secs(30), None);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to bind: {e}")))?;

        let addr = listener
            .local_addr()
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to get addr: {e}")))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
            ticker,
        })
    }
}

/// Spawn the task that advances the engine epoch every [`EPOCH_TICK`].
///
/// Returns `None` when epoch interruption is disabled.
pub fn spawn_epoch_ticker(engine: &WasmEngine) -> Option<JoinHandle<()>> {
    if !engine.is_epoch_enabled() {
        return None;
    }

    let engine = engine.clone();
    debug!(period_us = EPOCH_TICK.as_micros(), "Starting epoch ticker");

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(EPOCH_TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            engine.increment_epoch();
        }
    }))
}

/// Handle for a test server instance.
pub struct TestHandle {
    /// The address the server is bound to.
    addr: SocketAddr,
    /// Application state.
    state: AppState,
    /// Shutdown signal sender.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Server task handle.
    handle: JoinHandle<Result<(), std::io::Error>>,
    /// Epoch ticker, if running.
    ticker: Option<JoinHandle<()>>,
}

impl TestHandle {
    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// If a handler cannot be installed, that signal is simply never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
