//! HTTP file server for shared files.
//!
//! The server is started on demand by the share lifecycle and stopped when
//! nothing is shared anymore. It binds on all interfaces so other devices on
//! the LAN can reach it, walking up from a preferred port until one is free.

pub mod mime;
pub mod routes;

pub use mime::content_type;
pub use routes::{build_router, AppState, TransferError};

use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::registry::SharedRegistry;

/// Port tried first when nothing else is configured.
pub const DEFAULT_PORT: u16 = 50001;

/// How long `stop` waits for the serve task before detaching it. The accept
/// loop ends as soon as the shutdown signal arrives, so this only runs out
/// while downloads are still streaming.
const DETACH_AFTER: Duration = Duration::from_millis(100);

/// Errors that can occur while starting the file server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind port {port}: {source}")]
    PortBind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("No free port at or above {start}")]
    PortsExhausted { start: u16 },
}

/// Lifecycle state of the file server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running(u16),
}

impl ServerState {
    /// Whether a listener is accepting connections.
    pub fn is_running(&self) -> bool {
        matches!(self, ServerState::Running(_))
    }

    /// Port of the listener when running.
    pub fn port(&self) -> Option<u16> {
        match self {
            ServerState::Running(port) => Some(*port),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "stopped"),
            ServerState::Starting => write!(f, "starting"),
            ServerState::Running(port) => write!(f, "running on port {}", port),
        }
    }
}

/// Bind a listener on all interfaces, starting at `preferred_port`.
///
/// Ports that are already in use are skipped one at a time. Any other bind
/// failure (permission denied, no such address, ...) is returned as-is.
pub async fn bind_with_retry(preferred_port: u16) -> Result<TcpListener, ServerError> {
    let mut port = preferred_port;
    loop {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!(port, "Port in use, trying the next one");
                port = port.checked_add(1).ok_or(ServerError::PortsExhausted {
                    start: preferred_port,
                })?;
            }
            Err(source) => return Err(ServerError::PortBind { port, source }),
        }
    }
}

/// A listener that is accepting connections.
struct RunningServer {
    port: u16,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The HTTP server serving files out of a [`SharedRegistry`].
///
/// At most one listener exists at a time. Start and stop are serialized, so
/// two concurrent `ensure_started` calls share a single listener. Dropping the
/// server also shuts the listener down.
pub struct FileServer {
    registry: SharedRegistry,
    running: Mutex<Option<RunningServer>>,
    state_tx: watch::Sender<ServerState>,
}

impl FileServer {
    /// Create a stopped server reading from `registry`.
    pub fn new(registry: SharedRegistry) -> Self {
        let (state_tx, _) = watch::channel(ServerState::Stopped);
        Self {
            registry,
            running: Mutex::new(None),
            state_tx,
        }
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        *self.state_tx.borrow()
    }

    /// Port of the running listener, if any.
    pub fn port(&self) -> Option<u16> {
        self.state().port()
    }

    /// Watch state changes, e.g. to show an online/offline indicator.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    /// Start the server if it is not running and return its port.
    ///
    /// When a listener already exists its port is returned and nothing else
    /// happens.
    pub async fn ensure_started(&self, preferred_port: u16) -> Result<u16, ServerError> {
        let mut running = self.running.lock().await;
        if let Some(server) = running.as_ref() {
            return Ok(server.port);
        }

        self.state_tx.send_replace(ServerState::Starting);
        debug!(preferred_port, "Starting file server");

        let listener = match bind_with_retry(preferred_port).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "Failed to start file server");
                self.state_tx.send_replace(ServerState::Stopped);
                return Err(e);
            }
        };

        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(source) => {
                self.state_tx.send_replace(ServerState::Stopped);
                return Err(ServerError::PortBind {
                    port: preferred_port,
                    source,
                });
            }
        };

        let app = build_router(self.registry.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    // Resolves on an explicit stop or when the sender is dropped.
                    let _ = shutdown_rx.await;
                })
                .await;

            if let Err(e) = result {
                error!(port, error = %e, "File server terminated with an error");
            }
        });

        *running = Some(RunningServer {
            port,
            shutdown_tx,
            task,
        });
        self.state_tx.send_replace(ServerState::Running(port));

        info!(port, "File server listening on 0.0.0.0:{}", port);
        Ok(port)
    }

    /// Close the listener. Does nothing if the server is not running.
    ///
    /// New connections are refused once this returns. Downloads already in
    /// progress keep streaming in the background; this does not wait for them.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(server) = running.take() else {
            return;
        };

        let port = server.port;
        let _ = server.shutdown_tx.send(());

        match tokio::time::timeout(DETACH_AFTER, server.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(port, error = %e, "File server task failed"),
            Err(_) => debug!(port, "Transfers still in flight after stop, detaching them"),
        }

        self.state_tx.send_replace(ServerState::Stopped);
        info!(port, "File server stopped");
    }
}

/// Wait for the shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn free_port() -> u16 {
        std::net::TcpListener::bind(("0.0.0.0", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_bind_with_retry_uses_preferred_port_when_free() {
        let port = free_port();
        let listener = bind_with_retry(port).await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_bind_with_retry_skips_used_port() {
        let occupied = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = occupied.local_addr().unwrap().port();

        let listener = bind_with_retry(port).await.unwrap();
        assert!(listener.local_addr().unwrap().port() > port);
    }

    #[test]
    fn test_server_state_helpers() {
        assert!(!ServerState::Stopped.is_running());
        assert!(!ServerState::Starting.is_running());
        assert!(ServerState::Running(50001).is_running());
        assert_eq!(ServerState::Running(50001).port(), Some(50001));
        assert_eq!(ServerState::Starting.port(), None);
        assert_eq!(ServerState::Running(8080).to_string(), "running on port 8080");
    }

    #[tokio::test]
    async fn test_new_server_is_stopped() {
        let server = FileServer::new(Registry::new().into_shared());
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.port(), None);
    }

    #[tokio::test]
    async fn test_ensure_started_is_idempotent() {
        let server = FileServer::new(Registry::new().into_shared());

        let first = server.ensure_started(0).await.unwrap();
        let second = server.ensure_started(0).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(server.state(), ServerState::Running(first));

        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_concurrent_starts_share_one_listener() {
        let server = std::sync::Arc::new(FileServer::new(Registry::new().into_shared()));

        let a = tokio::spawn({
            let server = server.clone();
            async move { server.ensure_started(0).await.unwrap() }
        });
        let b = tokio::spawn({
            let server = server.clone();
            async move { server.ensure_started(0).await.unwrap() }
        });

        assert_eq!(a.await.unwrap(), b.await.unwrap());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let server = FileServer::new(Registry::new().into_shared());
        server.stop().await;
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_subscribe_sees_transitions() {
        let server = FileServer::new(Registry::new().into_shared());
        let mut rx = server.subscribe();

        let port = server.ensure_started(0).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ServerState::Running(port));

        server.stop().await;
        assert_eq!(*rx.borrow_and_update(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_releases_port() {
        let server = FileServer::new(Registry::new().into_shared());
        let port = server.ensure_started(0).await.unwrap();
        server.stop().await;

        let err = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
