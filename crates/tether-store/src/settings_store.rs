//! SQLite-backed settings store, one row per tenant.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use tracing::debug;

use tether_core::{current_unix_timestamp_ms, current_unix_timestamp_nanos};
use tether_gateway::IntegrationKind;

use crate::channel_settings::{ChannelConfig, ConnectionStatus};

const SETTINGS_DB_FILE: &str = "channel-settings.sqlite3";
const INSTANCE_NAME_PREFIX: &str = "tenant-";
const INSTANCE_NAME_DIGEST_BYTES: usize = 4;
const INSTANCE_TOKEN_BYTES: usize = 16;

/// Immutable instance settings applied when a tenant's row is first created.
#[derive(Debug, Clone)]
pub struct ProvisionTemplate {
    pub gateway_base_url: String,
    pub integration: IntegrationKind,
    pub webhook_url: Option<String>,
    pub webhook_events: Vec<String>,
}

/// Handle to the per-tenant channel settings table.
///
/// Opens a short-lived connection per operation, so the handle itself is
/// cheap to clone and safe to share across tasks.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    db_path: PathBuf,
}

impl SettingsStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        let db_path = state_dir.join(SETTINGS_DB_FILE);
        let connection = open_settings_connection(&db_path)?;
        initialize_settings_schema(&connection)?;
        Ok(Self { db_path })
    }

    pub fn get(&self, tenant_id: &str) -> Result<Option<ChannelConfig>> {
        let connection = open_settings_connection(&self.db_path)?;
        let mut statement = connection.prepare(
            r#"
            SELECT tenant_id, gateway_base_url, instance_name, instance_token,
                   integration, subscriber_number, webhook_url, webhook_events_json,
                   status, last_error, created_at_unix_ms, updated_at_unix_ms
            FROM channel_settings
            WHERE tenant_id = ?1
            "#,
        )?;
        let mut rows = statement.query(params![tenant_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_config_row(row)?)),
            None => Ok(None),
        }
    }

    /// Creates the tenant's row, or returns the existing one.
    ///
    /// Safe to call twice: a unique-constraint violation on the second call
    /// is resolved by re-reading the row that won the race. The instance
    /// name is a pure function of the tenant id and the token is generated
    /// exactly once, so re-provisioning always points at the same remote
    /// instance.
    pub fn create(&self, tenant_id: &str, template: &ProvisionTemplate) -> Result<ChannelConfig> {
        let tenant_id = tenant_id.trim();
        if tenant_id.is_empty() {
            bail!("tenant id cannot be empty");
        }

        let now = current_unix_timestamp_ms();
        let config = ChannelConfig {
            tenant_id: tenant_id.to_string(),
            gateway_base_url: template.gateway_base_url.trim_end_matches('/').to_string(),
            instance_name: derive_instance_name(tenant_id),
            instance_token: generate_instance_token(tenant_id),
            integration: template.integration,
            subscriber_number: None,
            webhook_url: template.webhook_url.clone(),
            webhook_events: template.webhook_events.clone(),
            status: ConnectionStatus::Created,
            last_error: None,
            created_at_unix_ms: now,
            updated_at_unix_ms: now,
        };

        let webhook_events_json = serde_json::to_string(&config.webhook_events)
            .context("failed to encode webhook events")?;
        let connection = open_settings_connection(&self.db_path)?;
        let inserted = connection.execute(
            r#"
            INSERT INTO channel_settings (
                tenant_id, gateway_base_url, instance_name, instance_token,
                integration, subscriber_number, webhook_url, webhook_events_json,
                status, last_error, created_at_unix_ms, updated_at_unix_ms
            )
            VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, ?8, NULL, ?9, ?10)
            "#,
            params![
                config.tenant_id,
                config.gateway_base_url,
                config.instance_name,
                config.instance_token,
                config.integration.as_str(),
                config.webhook_url,
                webhook_events_json,
                config.status.as_str(),
                config.created_at_unix_ms,
                config.updated_at_unix_ms,
            ],
        );

        match inserted {
            Ok(_) => {
                debug!(tenant = tenant_id, instance = %config.instance_name, "created channel settings row");
                Ok(config)
            }
            Err(error) if is_unique_violation(&error) => self
                .get(tenant_id)?
                .ok_or_else(|| anyhow!("channel settings row for '{tenant_id}' vanished mid-create")),
            Err(error) => Err(error)
                .with_context(|| format!("failed to insert channel settings for '{tenant_id}'")),
        }
    }

    /// Writes a status transition, optionally recording the subscriber number
    /// alongside it. Always advances `updated_at`; any write that is not
    /// ERROR clears the stored diagnostic.
    pub fn update_status(
        &self,
        tenant_id: &str,
        status: ConnectionStatus,
        subscriber_number: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let last_error = if status == ConnectionStatus::Error {
            last_error
        } else {
            None
        };
        let now = current_unix_timestamp_ms();
        let connection = open_settings_connection(&self.db_path)?;
        let updated = match subscriber_number {
            Some(number) => connection.execute(
                r#"
                UPDATE channel_settings
                SET status = ?2, subscriber_number = ?3, last_error = ?4,
                    updated_at_unix_ms = ?5
                WHERE tenant_id = ?1
                "#,
                params![tenant_id, status.as_str(), number, last_error, now],
            )?,
            None => connection.execute(
                r#"
                UPDATE channel_settings
                SET status = ?2, last_error = ?3, updated_at_unix_ms = ?4
                WHERE tenant_id = ?1
                "#,
                params![tenant_id, status.as_str(), last_error, now],
            )?,
        };
        if updated == 0 {
            bail!("no channel settings row for tenant '{tenant_id}'");
        }
        Ok(())
    }

    /// Re-opens the machine at INITIAL: clears the subscriber number and the
    /// diagnostic, keeps the provisioned instance identity.
    pub fn reset(&self, tenant_id: &str) -> Result<()> {
        let now = current_unix_timestamp_ms();
        let connection = open_settings_connection(&self.db_path)?;
        let updated = connection.execute(
            r#"
            UPDATE channel_settings
            SET status = ?2, subscriber_number = NULL, last_error = NULL,
                updated_at_unix_ms = ?3
            WHERE tenant_id = ?1
            "#,
            params![tenant_id, ConnectionStatus::Initial.as_str(), now],
        )?;
        if updated == 0 {
            bail!("no channel settings row for tenant '{tenant_id}'");
        }
        Ok(())
    }
}

/// Derives the remote instance name from tenant identity.
///
/// Pure and deterministic: recomputing it must always point at the same
/// remote instance, which is what makes instance creation idempotent. Ids
/// that sanitization would alter get a short digest of the raw id appended,
/// so two distinct tenants can never collapse onto one instance name.
pub fn derive_instance_name(tenant_id: &str) -> String {
    let raw = tenant_id.trim();
    let sanitized = raw
        .to_ascii_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect::<String>();
    let sanitized = sanitized.trim_matches('-');
    if sanitized == raw && !sanitized.is_empty() {
        return format!("{INSTANCE_NAME_PREFIX}{sanitized}");
    }
    let digest = Sha256::digest(raw.as_bytes());
    let disambiguator = digest
        .iter()
        .take(INSTANCE_NAME_DIGEST_BYTES)
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    if sanitized.is_empty() {
        format!("{INSTANCE_NAME_PREFIX}{disambiguator}")
    } else {
        format!("{INSTANCE_NAME_PREFIX}{sanitized}-{disambiguator}")
    }
}

fn generate_instance_token(tenant_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(current_unix_timestamp_nanos().to_be_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(INSTANCE_TOKEN_BYTES)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn open_settings_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let connection = Connection::open(path)
        .with_context(|| format!("failed to open channel settings store {}", path.display()))?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

fn initialize_settings_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS channel_settings (
            tenant_id TEXT PRIMARY KEY,
            gateway_base_url TEXT NOT NULL,
            instance_name TEXT NOT NULL,
            instance_token TEXT NOT NULL,
            integration TEXT NOT NULL,
            subscriber_number TEXT NULL,
            webhook_url TEXT NULL,
            webhook_events_json TEXT NOT NULL,
            status TEXT NOT NULL,
            last_error TEXT NULL,
            created_at_unix_ms INTEGER NOT NULL,
            updated_at_unix_ms INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn read_config_row(row: &rusqlite::Row<'_>) -> Result<ChannelConfig> {
    let tenant_id: String = row.get(0)?;
    let integration_raw: String = row.get(4)?;
    let integration = IntegrationKind::parse(&integration_raw).ok_or_else(|| {
        anyhow!("channel settings row for '{tenant_id}' has unknown integration '{integration_raw}'")
    })?;
    let webhook_events_json: String = row.get(7)?;
    let webhook_events: Vec<String> = serde_json::from_str(&webhook_events_json)
        .with_context(|| format!("failed to decode webhook events for '{tenant_id}'"))?;
    let status_raw: String = row.get(8)?;
    let status = ConnectionStatus::parse(&status_raw).ok_or_else(|| {
        anyhow!("channel settings row for '{tenant_id}' has unknown status '{status_raw}'")
    })?;

    Ok(ChannelConfig {
        gateway_base_url: row.get(1)?,
        instance_name: row.get(2)?,
        instance_token: row.get(3)?,
        integration,
        subscriber_number: row.get(5)?,
        webhook_url: row.get(6)?,
        webhook_events,
        status,
        last_error: row.get(9)?,
        created_at_unix_ms: row.get(10)?,
        updated_at_unix_ms: row.get(11)?,
        tenant_id,
    })
}
