//! Session entities and identity value objects.

use crate::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use std::borrow::Borrow;
use std::fmt;
use std::net::SocketAddr;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier the transport assigns to an accepted connection.
///
/// Exists before the client has told us its name, so every session can be
/// addressed from the moment it is accepted until it is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw connection number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw connection number.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Name a device or controller registers under.
///
/// Names travel inside colon-separated device lists, so they can never
/// contain the field separator, and they are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientName(String);

impl ClientName {
    /// Validates and wraps a client-supplied name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidName` when the name is empty, contains
    /// `:` or contains control characters.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let reason = if raw.is_empty() {
            Some("name is empty")
        } else if raw.contains(':') {
            Some("name contains ':'")
        } else if raw.chars().any(char::is_control) {
            Some("name contains control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(DomainError::InvalidName {
                name: raw.to_string(),
                reason,
            }),
            None => Ok(Self(raw.to_string())),
        }
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ClientName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Role
// ============================================================================

/// The two classes of client the broker pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// A controllable remote endpoint, e.g. a rover.
    Device,
    /// An operator endpoint that selects and drives a device.
    Controller,
}

impl Role {
    /// Returns the role a session of this role pairs with.
    pub fn counterpart(self) -> Self {
        match self {
            Self::Device => Self::Controller,
            Self::Controller => Self::Device,
        }
    }

    /// Lowercase label used in logs and error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Controller => "controller",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Name and role a session takes on at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: ClientName,
    pub role: Role,
}

/// Protocol state of a live session, derived from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted but no `DC`/`CC` yet.
    Unregistered,
    /// Registered and not paired.
    Unpaired,
    /// Registered and paired with `peer`.
    Paired { peer: ClientName },
}

/// One accepted connection.
///
/// The pairing is deliberately not stored here: the registry keeps it as a
/// single symmetric relation so both ends can never disagree.
#[derive(Debug, Clone)]
pub struct Session {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    identity: Option<Identity>,
}

impl Session {
    /// Creates an unregistered session for a freshly accepted connection.
    pub fn new(id: ConnectionId, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            remote_addr,
            connected_at: Utc::now(),
            identity: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Time since the connection was accepted.
    pub fn lifetime(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.connected_at)
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn name(&self) -> Option<&ClientName> {
        self.identity.as_ref().map(|i| &i.name)
    }

    pub fn role(&self) -> Option<Role> {
        self.identity.as_ref().map(|i| i.role)
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.identity.is_some()
    }

    pub(crate) fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub(crate) fn take_identity(&mut self) -> Option<Identity> {
        self.identity.take()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Some(identity) => write!(f, "{} {} ({})", identity.role, identity.name, self.id),
            None => write!(f, "unregistered {}", self.id),
        }
    }
}
