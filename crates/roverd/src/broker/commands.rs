//! Broker actor commands, errors, and disconnect reasons.
//!
//! This module defines the message types for communicating with the `BrokerActor`:
//! - `BrokerCommand`: Commands sent to the actor
//! - `BrokerError`: Errors that can occur while talking to the actor
//! - `DisconnectReason`: Why the transport closed a session
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::fmt;
use std::net::SocketAddr;

use rover_core::{ConnectionId, RegistrySnapshot};
use rover_protocol::{ClientCommand, ProtocolError, ServerMessage};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Broker Commands
// ============================================================================

/// Commands sent to the broker actor.
///
/// `Inbound` and `Disconnect` are fire-and-forget; the others carry a
/// oneshot channel for the response.
#[derive(Debug)]
pub enum BrokerCommand {
    /// A transport connection was accepted.
    ///
    /// The actor assigns the connection id and keeps `outbox` as the
    /// session's send path until the connection is closed.
    Connect {
        /// Remote socket address, when known
        remote_addr: Option<SocketAddr>,
        /// Bounded queue drained by the connection's writer task
        outbox: mpsc::Sender<ServerMessage>,
        /// Channel to send the assigned id
        respond_to: oneshot::Sender<ConnectionId>,
    },

    /// A line arrived on a connection, already decoded.
    Inbound {
        /// Connection the line arrived on
        connection: ConnectionId,
        /// Decoded command, or why decoding failed
        frame: Result<ClientCommand, ProtocolError>,
    },

    /// A transport connection closed.
    Disconnect {
        /// Connection that closed
        connection: ConnectionId,
        /// Why it closed
        reason: DisconnectReason,
    },

    /// Copy out the registry contents.
    Snapshot {
        respond_to: oneshot::Sender<RegistrySnapshot>,
    },

    /// Strip every live session back to unregistered.
    Reset { respond_to: oneshot::Sender<()> },
}

// ============================================================================
// Broker Errors
// ============================================================================

/// Errors that can occur when talking to the broker actor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The command or response channel was closed.
    ///
    /// This typically indicates the actor was shut down.
    #[error("broker channel closed")]
    ChannelClosed,
}

// ============================================================================
// Disconnect Reasons
// ============================================================================

/// Why a transport connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed its end.
    Eof,

    /// Reading from the socket failed.
    Io(String),

    /// The client sent a line over the configured limit.
    LineTooLong { size: usize, max: usize },

    /// Writing to the socket failed.
    WriteFailed(String),

    /// Writing a line took longer than the configured timeout.
    WriteTimeout,

    /// The server is shutting down.
    Shutdown,

    /// The broker actor stopped while the connection was open.
    BrokerUnavailable,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => write!(f, "closed by client"),
            Self::Io(e) => write!(f, "read error: {e}"),
            Self::LineTooLong { size, max } => {
                write!(f, "line too long ({size} bytes, max {max})")
            }
            Self::WriteFailed(e) => write!(f, "write error: {e}"),
            Self::WriteTimeout => write!(f, "write timed out"),
            Self::Shutdown => write!(f, "server shutting down"),
            Self::BrokerUnavailable => write!(f, "broker unavailable"),
        }
    }
}
