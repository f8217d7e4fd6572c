//! Typed client for the remote channel gateway.
//!
//! Wraps the gateway's instance operations (create, pairing fetch, state
//! probe, webhook registration) behind normalized outcomes so the connection
//! state machine never inspects raw gateway responses.

pub mod gateway_client;
pub mod gateway_contract;

pub use gateway_client::{GatewayClient, GatewayConfig, GatewayError, InstanceTarget};
pub use gateway_contract::{
    CreateOutcome, IntegrationKind, PairingCredentials, RemoteSessionState,
};
