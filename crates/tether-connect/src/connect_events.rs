//! Event types flowing between the watchers, the attempt task, and
//! subscribers.

use tether_gateway::{PairingCredentials, RemoteSessionState};
use tether_store::ConnectionStatus;

/// Which watcher resolved an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Poller,
    PushListener,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Poller => "poller",
            ResolutionSource::PushListener => "push_listener",
        }
    }
}

/// One observation fed into the attempt's fan-in channel by the poller or
/// the push listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A normalized session-state observation.
    Observed {
        state: RemoteSessionState,
        source: ResolutionSource,
    },
    /// A single probe failed; the loop retries on its next tick.
    ProbeFailed { detail: String },
    /// The polling budget elapsed without an open observation.
    TimedOut,
}

/// One status transition pushed to subscribers.
///
/// While the pairing window is open the update carries the credentials a
/// device needs to authorize the instance; terminal updates drop them.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectUpdate {
    pub status: ConnectionStatus,
    pub credentials: Option<PairingCredentials>,
    pub error: Option<String>,
}

impl ConnectUpdate {
    pub fn status_only(status: ConnectionStatus) -> Self {
        Self {
            status,
            credentials: None,
            error: None,
        }
    }

    pub fn with_credentials(status: ConnectionStatus, credentials: PairingCredentials) -> Self {
        Self {
            status,
            credentials: Some(credentials),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Error,
            credentials: None,
            error: Some(error.into()),
        }
    }
}
