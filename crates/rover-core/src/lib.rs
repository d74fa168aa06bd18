//! Rover Core - Shared domain types for the relay broker
//!
//! This crate provides the identity and pairing model shared between
//! the wire protocol (rover-protocol) and the daemon (roverd):
//! - `session` - connection ids, client names, roles and per-connection state
//! - `registry` - the authority on who is connected and who is paired with whom
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod registry;
pub mod session;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use registry::{Departure, Peer, Registry, RegistrySnapshot};
pub use session::{ClientName, ConnectionId, Identity, Role, Session, SessionState};
