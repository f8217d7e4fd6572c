//! Wire contract for the channel gateway: request/response shapes plus the
//! normalization rules that keep gateway quirks out of the state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use base64::Engine as _;

/// Integration protocol label carried on instance creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntegrationKind {
    #[default]
    #[serde(rename = "WHATSAPP-BAILEYS")]
    WhatsappBaileys,
    #[serde(rename = "WHATSAPP-BUSINESS")]
    WhatsappBusiness,
}

impl IntegrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationKind::WhatsappBaileys => "WHATSAPP-BAILEYS",
            IntegrationKind::WhatsappBusiness => "WHATSAPP-BUSINESS",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "WHATSAPP-BAILEYS" | "BAILEYS" => Some(IntegrationKind::WhatsappBaileys),
            "WHATSAPP-BUSINESS" | "BUSINESS" => Some(IntegrationKind::WhatsappBusiness),
            _ => None,
        }
    }
}

/// Outcome of an instance-create call. A duplicate at the gateway is not an
/// error; callers treat both variants as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Accepted,
    AlreadyExists,
}

/// Remote session state reported by the gateway, normalized to three values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSessionState {
    Open,
    Closed,
    Connecting,
}

impl RemoteSessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteSessionState::Open => "open",
            RemoteSessionState::Closed => "closed",
            RemoteSessionState::Connecting => "connecting",
        }
    }
}

/// Credentials a human uses to authorize the instance on their device.
///
/// Transient: held in memory for the duration of the pairing window and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCredentials {
    /// Base64-encoded PNG of the scannable code, data-URL prefix stripped.
    pub scan_payload: Option<String>,
    /// Short code typed manually instead of scanning.
    pub pairing_code: Option<String>,
}

impl PairingCredentials {
    /// Decodes the scan payload into raw PNG bytes for rendering to a file.
    pub fn decode_scan_png(&self) -> Option<Vec<u8>> {
        let payload = self.scan_payload.as_deref()?;
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .ok()
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateInstanceRequest<'a> {
    #[serde(rename = "instanceName")]
    pub(crate) instance_name: &'a str,
    pub(crate) token: &'a str,
    pub(crate) qrcode: bool,
    pub(crate) integration: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) number: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PairingResponse {
    #[serde(default)]
    pub(crate) base64: Option<String>,
    #[serde(rename = "pairingCode", default)]
    pub(crate) pairing_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RegisterWebhookRequest<'a> {
    pub(crate) url: &'a str,
    pub(crate) webhook_by_events: bool,
    pub(crate) webhook_base64: bool,
    pub(crate) events: &'a [String],
}

const DATA_URL_PNG_PREFIX: &str = "data:image/png;base64,";

/// Strips the data-URL wrapper some gateway versions put around the QR PNG.
pub(crate) fn strip_data_url_prefix(payload: &str) -> &str {
    payload
        .strip_prefix(DATA_URL_PNG_PREFIX)
        .unwrap_or(payload)
}

/// Single classification rule for the gateway's duplicate-instance responses.
///
/// Observed shapes: HTTP 409 with no stable body, and HTTP 403 whose message
/// array says the name is already in use. Status is checked first; the
/// substring fallback applies to 403 bodies only.
pub(crate) fn classify_already_exists(status: u16, body: &str) -> bool {
    if status == 409 {
        return true;
    }
    if status == 403 {
        let lowered = body.to_ascii_lowercase();
        return lowered.contains("already in use") || lowered.contains("already exists");
    }
    false
}

/// Pulls the connection-state token out of the probe response, tolerating the
/// nesting drift across gateway versions.
pub(crate) fn extract_state_token(body: &Value) -> Option<&str> {
    const CANDIDATE_PATHS: [&[&str]; 4] = [
        &["state"],
        &["instance", "state"],
        &["connectionState"],
        &["instance", "connectionState"],
    ];
    CANDIDATE_PATHS.iter().find_map(|path| {
        let mut cursor = body;
        for key in *path {
            cursor = cursor.get(key)?;
        }
        cursor.as_str()
    })
}

pub(crate) fn normalize_state_token(token: &str) -> Option<RemoteSessionState> {
    match token.trim().to_ascii_lowercase().as_str() {
        "open" => Some(RemoteSessionState::Open),
        "close" | "closed" => Some(RemoteSessionState::Closed),
        "connecting" => Some(RemoteSessionState::Connecting),
        _ => None,
    }
}
