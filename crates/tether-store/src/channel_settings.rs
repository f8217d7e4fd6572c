//! Persisted channel configuration types.

use serde::{Deserialize, Serialize};

use tether_gateway::{InstanceTarget, IntegrationKind};

/// Lifecycle status of a tenant's channel.
///
/// The persisted value is the single source of truth for where the tenant is
/// in the pairing flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Initial,
    Created,
    Creating,
    Pending,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Initial => "INITIAL",
            ConnectionStatus::Created => "CREATED",
            ConnectionStatus::Creating => "CREATING",
            ConnectionStatus::Pending => "PENDING",
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Error => "ERROR",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "INITIAL" => Some(ConnectionStatus::Initial),
            "CREATED" => Some(ConnectionStatus::Created),
            "CREATING" => Some(ConnectionStatus::Creating),
            "PENDING" => Some(ConnectionStatus::Pending),
            "CONNECTING" => Some(ConnectionStatus::Connecting),
            "CONNECTED" => Some(ConnectionStatus::Connected),
            "ERROR" => Some(ConnectionStatus::Error),
            _ => None,
        }
    }

    /// True for the pairing-window states an interrupted attempt leaves behind.
    pub fn is_mid_attempt(&self) -> bool {
        matches!(self, ConnectionStatus::Pending | ConnectionStatus::Connecting)
    }
}

/// One tenant's channel settings row.
///
/// `gateway_base_url`, `instance_name`, and `instance_token` are immutable
/// once the row exists; everything else is written through status updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub tenant_id: String,
    pub gateway_base_url: String,
    pub instance_name: String,
    pub instance_token: String,
    pub integration: IntegrationKind,
    pub subscriber_number: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_events: Vec<String>,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub created_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
}

impl ChannelConfig {
    /// View of this row the gateway client operates on. The row's base url
    /// rides along so requests route to the gateway the instance was
    /// provisioned on.
    pub fn instance_target(&self) -> InstanceTarget {
        InstanceTarget {
            gateway_base_url: self.gateway_base_url.clone(),
            instance_name: self.instance_name.clone(),
            instance_token: self.instance_token.clone(),
            integration: self.integration,
            subscriber_number: self.subscriber_number.clone(),
        }
    }
}
