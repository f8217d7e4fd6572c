//! HTTP client for the channel gateway's provisioning and pairing API.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::gateway_contract::{
    classify_already_exists, extract_state_token, normalize_state_token, strip_data_url_prefix,
    CreateInstanceRequest, CreateOutcome, IntegrationKind, PairingCredentials, PairingResponse,
    RegisterWebhookRequest, RemoteSessionState,
};

const ERROR_BODY_MAX_CHARS: usize = 800;

/// Typed error surface for gateway calls.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway configuration invalid: {0}")]
    InvalidConfig(String),
    #[error("instance is not provisioned at the gateway")]
    InstanceMissing,
    #[error("gateway request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway returned an unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Transport settings shared by every gateway request.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    /// Per-call ceiling; must stay below the poll interval so one slow call
    /// cannot stall the loop.
    pub request_timeout: Duration,
    pub retry_max_attempts: usize,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            request_timeout: Duration::from_secs(3),
            retry_max_attempts: 2,
            retry_base_delay: Duration::from_millis(250),
        }
    }
}

/// Per-tenant view of the remote instance the client operates on.
///
/// Carries the gateway base url recorded on the tenant's settings row, so
/// requests keep reaching the gateway the instance was provisioned on even
/// when the process was started against a different one.
#[derive(Debug, Clone)]
pub struct InstanceTarget {
    pub gateway_base_url: String,
    pub instance_name: String,
    pub instance_token: String,
    pub integration: IntegrationKind,
    pub subscriber_number: Option<String>,
}

enum GatewayResponse {
    Success(Value),
    Failure { status: u16, body: String },
}

/// Async client wrapping the gateway's four instance operations. Request
/// URLs are built from each target's base url, not a client-wide one.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let api_key = reqwest::header::HeaderValue::from_str(config.api_key.trim()).map_err(
            |_| GatewayError::InvalidConfig("gateway api key is not a valid header value".to_string()),
        )?;
        headers.insert("apikey", api_key);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout.max(Duration::from_millis(1)))
            .build()?;

        Ok(Self {
            http,
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: u64::try_from(config.retry_base_delay.as_millis())
                .unwrap_or(u64::MAX)
                .max(1),
        })
    }

    /// Provisions the tenant's instance at the gateway.
    ///
    /// Creating an instance whose name already exists is success, not an
    /// error; the duplicate classification lives in one place so callers
    /// never inspect raw gateway bodies.
    pub async fn create_instance(
        &self,
        target: &InstanceTarget,
    ) -> Result<CreateOutcome, GatewayError> {
        let payload = CreateInstanceRequest {
            instance_name: &target.instance_name,
            token: &target.instance_token,
            qrcode: true,
            integration: target.integration.as_str(),
            number: target.subscriber_number.as_deref(),
        };
        let url = request_url(target, "/instance/create")?;
        let response = self
            .execute("instance create", || self.http.post(&url).json(&payload))
            .await?;
        match response {
            GatewayResponse::Success(_) => Ok(CreateOutcome::Accepted),
            GatewayResponse::Failure { status, body } => {
                if classify_already_exists(status, &body) {
                    debug!(
                        instance = %target.instance_name,
                        status, "instance already provisioned at gateway"
                    );
                    Ok(CreateOutcome::AlreadyExists)
                } else {
                    Err(GatewayError::RequestFailed {
                        status,
                        body: truncate_for_error(&body, ERROR_BODY_MAX_CHARS),
                    })
                }
            }
        }
    }

    /// Fetches the pairing credentials for an instance awaiting authorization.
    ///
    /// A 404 means the remote instance expired or was never provisioned;
    /// callers recreate it once and retry once before giving up.
    pub async fn fetch_pairing_credentials(
        &self,
        target: &InstanceTarget,
    ) -> Result<PairingCredentials, GatewayError> {
        let url = request_url(target, &format!("/instance/connect/{}", target.instance_name))?;
        let response = self.execute("pairing fetch", || self.http.get(&url)).await?;
        match response {
            GatewayResponse::Success(body) => {
                let parsed: PairingResponse = serde_json::from_value(body).map_err(|error| {
                    GatewayError::UnexpectedResponse(format!(
                        "pairing response did not match contract: {error}"
                    ))
                })?;
                let scan_payload = parsed
                    .base64
                    .as_deref()
                    .map(strip_data_url_prefix)
                    .map(str::to_string)
                    .filter(|value| !value.trim().is_empty());
                let pairing_code = parsed
                    .pairing_code
                    .filter(|value| !value.trim().is_empty());
                if scan_payload.is_none() && pairing_code.is_none() {
                    return Err(GatewayError::UnexpectedResponse(
                        "pairing response carried neither scan payload nor pairing code"
                            .to_string(),
                    ));
                }
                Ok(PairingCredentials {
                    scan_payload,
                    pairing_code,
                })
            }
            GatewayResponse::Failure { status: 404, .. } => Err(GatewayError::InstanceMissing),
            GatewayResponse::Failure { status, body } => Err(GatewayError::RequestFailed {
                status,
                body: truncate_for_error(&body, ERROR_BODY_MAX_CHARS),
            }),
        }
    }

    /// Reads the instance's remote session state as a normalized three-value
    /// enum, tolerating the field-nesting drift across gateway versions.
    pub async fn connection_state(
        &self,
        target: &InstanceTarget,
    ) -> Result<RemoteSessionState, GatewayError> {
        let url = request_url(
            target,
            &format!("/instance/connectionState/{}", target.instance_name),
        )?;
        let response = self.execute("state probe", || self.http.get(&url)).await?;
        match response {
            GatewayResponse::Success(body) => {
                let token = extract_state_token(&body).ok_or_else(|| {
                    GatewayError::UnexpectedResponse(
                        "state probe response carried no state field".to_string(),
                    )
                })?;
                normalize_state_token(token).ok_or_else(|| {
                    GatewayError::UnexpectedResponse(format!(
                        "unknown connection state token '{token}'"
                    ))
                })
            }
            GatewayResponse::Failure { status: 404, .. } => Err(GatewayError::InstanceMissing),
            GatewayResponse::Failure { status, body } => Err(GatewayError::RequestFailed {
                status,
                body: truncate_for_error(&body, ERROR_BODY_MAX_CHARS),
            }),
        }
    }

    /// Registers the inbound-event webhook for an instance.
    pub async fn register_webhook(
        &self,
        target: &InstanceTarget,
        webhook_url: &str,
        events: &[String],
    ) -> Result<(), GatewayError> {
        let url = request_url(target, &format!("/webhook/set/{}", target.instance_name))?;
        let payload = RegisterWebhookRequest {
            url: webhook_url,
            webhook_by_events: true,
            webhook_base64: true,
            events,
        };
        let response = self
            .execute("webhook register", || self.http.post(&url).json(&payload))
            .await?;
        match response {
            GatewayResponse::Success(_) => Ok(()),
            GatewayResponse::Failure { status, body } => Err(GatewayError::RequestFailed {
                status,
                body: truncate_for_error(&body, ERROR_BODY_MAX_CHARS),
            }),
        }
    }

    async fn execute<F>(
        &self,
        operation: &str,
        mut builder: F,
    ) -> Result<GatewayResponse, GatewayError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder().send().await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        let parsed = if body.trim().is_empty() {
                            Value::Null
                        } else {
                            serde_json::from_str(&body).map_err(|error| {
                                GatewayError::UnexpectedResponse(format!(
                                    "{operation} returned a non-JSON body: {error}"
                                ))
                            })?
                        };
                        return Ok(GatewayResponse::Success(parsed));
                    }
                    if attempt < self.retry_max_attempts
                        && is_retryable_gateway_status(status.as_u16())
                    {
                        debug!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            "retrying gateway call after retryable status"
                        );
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt)).await;
                        continue;
                    }
                    return Ok(GatewayResponse::Failure {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        debug!(
                            operation,
                            attempt, "retrying gateway call after transport error"
                        );
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt)).await;
                        continue;
                    }
                    return Err(GatewayError::Transport(error));
                }
            }
        }
    }
}

fn request_url(target: &InstanceTarget, path: &str) -> Result<String, GatewayError> {
    let base = target.gateway_base_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(GatewayError::InvalidConfig(
            "instance target carries no gateway base url".to_string(),
        ));
    }
    Ok(format!("{base}{path}"))
}

fn is_retryable_gateway_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

fn retry_delay(base_delay_ms: u64, attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    let scaled = base_delay_ms.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_millis(scaled.min(30_000))
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
