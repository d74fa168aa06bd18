//! Rendezvous broker using the Actor pattern.
//!
//! The broker pairs devices with controllers and relays lines between them.
//! Connection tasks send it decoded lines over an mpsc channel; the actor
//! applies them to the registry and pushes replies into per-connection
//! outboxes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  BrokerCommand  ┌─────────────────┐
//! │ConnectionHandler│────────────────▶│   BrokerActor   │
//! │   (per client)  │  (mpsc channel) │                 │
//! └─────────────────┘                 │ Broker+Registry │
//!         ▲                           └────────┬────────┘
//!         │         ServerMessage              │
//!         └────────────────────────────────────┘
//!               (per-connection outbox)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;
mod machine;
pub mod notifier;

pub use actor::BrokerActor;
pub use commands::{BrokerCommand, BrokerError, DisconnectReason};
pub use handle::BrokerHandle;
pub use machine::{Broker, Outbound};

/// Command channel buffer size
const COMMAND_BUFFER: usize = 1024;

/// Spawn the broker actor and return a handle for interaction.
///
/// The actor stops once every handle clone has been dropped.
///
/// # Example
///
/// ```no_run
/// use roverd::broker::spawn_broker;
///
/// #[tokio::main]
/// async fn main() {
///     let broker = spawn_broker();
///     let snapshot = broker.snapshot().await;
/// }
/// ```
pub fn spawn_broker() -> BrokerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = BrokerActor::new(cmd_rx);
    tokio::spawn(actor.run());

    BrokerHandle::new(cmd_tx)
}
