//! Domain-specific error types following panic-free policy.

use crate::{ClientName, ConnectionId, Role};
use thiserror::Error;

/// Errors that can occur in registry and pairing operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A client name failed validation
    #[error("Invalid client name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Another live session already holds this name
    #[error("Name already in use: {name}")]
    NameTaken { name: ClientName },

    /// The connection already registered under a name
    #[error("Connection {connection} is already registered as {name}")]
    AlreadyRegistered {
        connection: ConnectionId,
        name: ClientName,
    },

    /// The connection is not known to the registry
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection has not registered a name yet
    #[error("Connection {0} has not registered")]
    NotRegistered(ConnectionId),

    /// The session has no paired peer to relay to
    #[error("Connection {0} is not paired")]
    NotPaired(ConnectionId),

    /// The session holds the wrong role for the requested operation
    #[error("Connection {connection} is not a {expected}")]
    RoleMismatch {
        connection: ConnectionId,
        expected: Role,
    },

    /// No registered session carries the selected device name
    #[error("Device not found: {name}")]
    UnknownDevice { name: ClientName },

    /// The selected device is paired with another controller
    #[error("Device {name} is paired with {controller}")]
    DeviceUnavailable {
        name: ClientName,
        controller: ClientName,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
