//! Connection lifecycle orchestration for tenant messaging channels.
//!
//! Drives a tenant's channel from a fresh settings row through instance
//! provisioning and pairing to a confirmed connected session: a bounded
//! poller (optionally raced by a WebSocket push listener) watches the remote
//! session state, every transition is persisted and broadcast, and attempts
//! are cancellable at any point.

pub mod connect_events;
pub mod connect_journal;
pub mod connect_orchestrator;
pub mod connect_poller;
pub mod connect_push;

pub use connect_events::{ConnectUpdate, ResolutionSource, WatchEvent};
pub use connect_journal::AttemptJournal;
pub use connect_orchestrator::{
    normalize_subscriber_number, ConnectError, ConnectOrchestrator, OrchestratorConfig,
};
pub use connect_poller::{spawn_state_poller, PollerConfig};
pub use connect_push::spawn_push_listener;
