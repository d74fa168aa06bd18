//! Client interface for interacting with the BrokerActor.
//!
//! The `BrokerHandle` is a cheap-to-clone interface that connection tasks,
//! the server and tests use to reach the broker actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `BrokerError::ChannelClosed`

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};

use rover_core::{ConnectionId, RegistrySnapshot};
use rover_protocol::{decode_bytes, ClientCommand, ProtocolError, ServerMessage};

use super::commands::{BrokerCommand, BrokerError, DisconnectReason};

// ============================================================================
// Broker Handle
// ============================================================================

/// Handle for interacting with the broker actor.
///
/// # Usage
///
/// ```ignore
/// let (outbox, mut inbox) = mpsc::channel(256);
/// let id = broker.connect(Some(addr), outbox).await?;
///
/// broker.submit_line(id, b"DC:rover1\r\n").await?;
/// while let Some(line) = inbox.recv().await {
///     // write `line` to the socket
/// }
///
/// broker.disconnect(id, DisconnectReason::Eof).await?;
/// ```
#[derive(Clone)]
pub struct BrokerHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<BrokerCommand>,
}

impl BrokerHandle {
    /// Create a new broker handle.
    pub fn new(sender: mpsc::Sender<BrokerCommand>) -> Self {
        Self { sender }
    }

    /// Attaches a new connection and returns its id.
    ///
    /// Every line for the connection is pushed into `outbox` from now on.
    ///
    /// # Errors
    ///
    /// - `BrokerError::ChannelClosed` if the actor has shut down
    pub async fn connect(
        &self,
        remote_addr: Option<SocketAddr>,
        outbox: mpsc::Sender<ServerMessage>,
    ) -> Result<ConnectionId, BrokerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(BrokerCommand::Connect {
                remote_addr,
                outbox,
                respond_to: tx,
            })
            .await
            .map_err(|_| BrokerError::ChannelClosed)?;

        rx.await.map_err(|_| BrokerError::ChannelClosed)
    }

    /// Hands a decoded line (or its decode failure) to the broker.
    ///
    /// # Errors
    ///
    /// - `BrokerError::ChannelClosed` if the actor has shut down
    pub async fn submit(
        &self,
        connection: ConnectionId,
        frame: Result<ClientCommand, ProtocolError>,
    ) -> Result<(), BrokerError> {
        self.sender
            .send(BrokerCommand::Inbound { connection, frame })
            .await
            .map_err(|_| BrokerError::ChannelClosed)
    }

    /// Decodes a raw line and hands it to the broker.
    ///
    /// # Errors
    ///
    /// - `BrokerError::ChannelClosed` if the actor has shut down
    pub async fn submit_line(&self, connection: ConnectionId, line: &[u8]) -> Result<(), BrokerError> {
        self.submit(connection, decode_bytes(line)).await
    }

    /// Reports that a connection closed.
    ///
    /// # Errors
    ///
    /// - `BrokerError::ChannelClosed` if the actor has shut down
    pub async fn disconnect(
        &self,
        connection: ConnectionId,
        reason: DisconnectReason,
    ) -> Result<(), BrokerError> {
        self.sender
            .send(BrokerCommand::Disconnect { connection, reason })
            .await
            .map_err(|_| BrokerError::ChannelClosed)
    }

    /// Copy of the current registry contents.
    ///
    /// # Errors
    ///
    /// - `BrokerError::ChannelClosed` if the actor has shut down
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, BrokerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(BrokerCommand::Snapshot { respond_to: tx })
            .await
            .map_err(|_| BrokerError::ChannelClosed)?;

        rx.await.map_err(|_| BrokerError::ChannelClosed)
    }

    /// Drops every registration and pairing; connections stay open.
    ///
    /// # Errors
    ///
    /// - `BrokerError::ChannelClosed` if the actor has shut down
    pub async fn reset(&self) -> Result<(), BrokerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(BrokerCommand::Reset { respond_to: tx })
            .await
            .map_err(|_| BrokerError::ChannelClosed)?;

        rx.await.map_err(|_| BrokerError::ChannelClosed)
    }
}
