//! Per-tenant channel settings persistence.
//!
//! One SQLite row per tenant holds the provisioned instance identity, the
//! subscriber number being paired, and the connection status the rest of the
//! system treats as ground truth.

pub mod channel_settings;
pub mod settings_store;

pub use channel_settings::{ChannelConfig, ConnectionStatus};
pub use settings_store::{derive_instance_name, ProvisionTemplate, SettingsStore};
