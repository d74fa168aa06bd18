//! TCP server for the rover relay broker.
//!
//! The server:
//! - Listens on a TCP socket for devices and controllers
//! - Spawns a ConnectionHandler for each client
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  BrokerServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  BrokerHandle   │
//! │   (per client)  │◀────│                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerHandle, DisconnectReason};
use crate::config::BrokerConfig;

/// How long open connections get to wind down after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// TCP server for the relay broker.
pub struct BrokerServer {
    /// Listen address and per-connection limits
    config: BrokerConfig,

    /// Handle to the broker actor
    broker: BrokerHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,
}

impl BrokerServer {
    /// Creates a new broker server.
    pub fn new(config: BrokerConfig, broker: BrokerHandle, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            broker,
            cancel_token,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Binds the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.listen_addr();
        TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
            addr,
            error: e.to_string(),
        })
    }

    /// Runs the server.
    ///
    /// Listens for connections until the cancellation token is triggered.
    /// This method does not return until shutdown.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the listen address cannot be bound.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.run_with_listener(listener).await;
        Ok(())
    }

    /// Serves an already bound listener until the cancellation token fires.
    ///
    /// Tests bind `127.0.0.1:0` themselves and hand the listener in.
    pub async fn run_with_listener(&self, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "Broker server listening"),
            Err(e) => warn!(error = %e, "Broker server listening on unknown address"),
        }

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let handler = ConnectionHandler::new(
                                stream,
                                addr,
                                self.broker.clone(),
                                &self.config,
                                self.cancel_token.clone(),
                            );
                            connections.spawn(handler.run());
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        drop(listener);
        self.drain(&mut connections).await;
        info!("Server stopped");
    }

    /// Waits for connection tasks to finish, aborting stragglers.
    async fn drain(&self, connections: &mut JoinSet<DisconnectReason>) {
        let open = connections.len();
        if open == 0 {
            return;
        }
        debug!(open, "Waiting for connections to close");

        let drained = timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = connections.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Connection task failed during shutdown");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = connections.len(), "Shutdown grace period elapsed, aborting connections");
            connections.abort_all();
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },
}
