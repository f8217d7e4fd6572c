mod bootstrap_helpers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::warn;

use tether_connect::{ConnectOrchestrator, ConnectUpdate, OrchestratorConfig, PollerConfig};
use tether_core::write_bytes_atomic;
use tether_gateway::{GatewayClient, GatewayConfig, IntegrationKind, PairingCredentials};
use tether_store::{ConnectionStatus, ProvisionTemplate, SettingsStore};

use crate::bootstrap_helpers::init_tracing;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_integration(value: &str) -> Result<IntegrationKind, String> {
    IntegrationKind::parse(value).ok_or_else(|| {
        format!("unknown integration '{value}' (expected whatsapp-baileys or whatsapp-business)")
    })
}

#[derive(Debug, Parser)]
#[command(
    name = "tether",
    about = "Provisions and supervises tenant messaging-channel connections",
    version
)]
struct Cli {
    #[arg(
        long = "state-dir",
        env = "TETHER_STATE_DIR",
        default_value = ".tether",
        help = "Directory holding the settings database and the attempt journal"
    )]
    state_dir: PathBuf,

    #[arg(
        long = "gateway-url",
        env = "TETHER_GATEWAY_URL",
        help = "Gateway base URL recorded when a tenant's channel is first provisioned"
    )]
    gateway_url: String,

    #[arg(
        long = "api-key",
        env = "TETHER_GATEWAY_API_KEY",
        help = "API key sent as the gateway's apikey header"
    )]
    api_key: String,

    #[arg(
        long = "events-url",
        env = "TETHER_EVENTS_URL",
        help = "Optional WebSocket URL for push connection updates"
    )]
    events_url: Option<String>,

    #[arg(
        long = "poll-interval-ms",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Gap between connection-state probes"
    )]
    poll_interval_ms: u64,

    #[arg(
        long = "max-poll-ms",
        default_value_t = 120_000,
        value_parser = parse_positive_u64,
        help = "Ceiling on the pairing watch before the attempt times out"
    )]
    max_poll_ms: u64,

    #[arg(
        long = "request-timeout-ms",
        default_value_t = 3_000,
        value_parser = parse_positive_u64,
        help = "Per-call HTTP timeout; keep it below the poll interval"
    )]
    request_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provision the tenant's instance and follow the pairing flow to a
    /// terminal state.
    Connect {
        #[arg(long, help = "Tenant identifier")]
        tenant: String,

        #[arg(long, help = "Subscriber number to pair; non-digits are stripped")]
        number: String,

        #[arg(
            long,
            default_value = "whatsapp-baileys",
            value_parser = parse_integration,
            help = "Gateway integration used when the instance is first provisioned"
        )]
        integration: IntegrationKind,

        #[arg(
            long = "webhook-url",
            help = "Inbound webhook registered at the gateway once connected"
        )]
        webhook_url: Option<String>,

        #[arg(
            long = "webhook-event",
            value_delimiter = ',',
            default_value = "MESSAGES_UPSERT",
            help = "Webhook event subscriptions"
        )]
        webhook_events: Vec<String>,

        #[arg(
            long = "qr-file",
            help = "Write the pairing QR PNG to this path when credentials arrive"
        )]
        qr_file: Option<PathBuf>,
    },
    /// Re-attach to the tenant's channel and follow it to a terminal state.
    Resume {
        #[arg(long, help = "Tenant identifier")]
        tenant: String,

        #[arg(
            long = "qr-file",
            help = "Write the pairing QR PNG to this path when credentials arrive"
        )]
        qr_file: Option<PathBuf>,
    },
    /// Stop the tenant's in-flight attempt; persisted status is unchanged.
    Cancel {
        #[arg(long, help = "Tenant identifier")]
        tenant: String,
    },
    /// Re-open the tenant's channel at INITIAL, clearing number and error.
    Reset {
        #[arg(long, help = "Tenant identifier")]
        tenant: String,
    },
    /// Print the tenant's persisted settings row as JSON.
    Status {
        #[arg(long, help = "Tenant identifier")]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let store = SettingsStore::open(&cli.state_dir)?;
    match cli.command {
        Command::Connect {
            ref tenant,
            ref number,
            integration,
            ref webhook_url,
            ref webhook_events,
            ref qr_file,
        } => {
            let template = ProvisionTemplate {
                gateway_base_url: cli.gateway_url.clone(),
                integration,
                webhook_url: webhook_url.clone(),
                webhook_events: webhook_events.clone(),
            };
            let orchestrator = build_orchestrator(&cli, store, template)?;
            let mut updates = orchestrator.subscribe(tenant);
            orchestrator.connect(tenant, number)?;
            let outcome =
                follow_to_terminal(&orchestrator, tenant, &mut updates, qr_file.as_deref()).await;
            orchestrator.shutdown().await;
            outcome
        }
        Command::Resume {
            ref tenant,
            ref qr_file,
        } => {
            let template = default_template(&cli);
            let orchestrator = build_orchestrator(&cli, store, template)?;
            let mut updates = orchestrator.subscribe(tenant);
            orchestrator.resume(tenant).await?;
            let outcome =
                follow_to_terminal(&orchestrator, tenant, &mut updates, qr_file.as_deref()).await;
            orchestrator.shutdown().await;
            outcome
        }
        Command::Cancel { ref tenant } => {
            let orchestrator = build_orchestrator(&cli, store, default_template(&cli))?;
            if orchestrator.cancel(tenant).await {
                println!("stopped the in-flight attempt for '{tenant}'");
            } else {
                println!("no in-flight attempt for '{tenant}' in this process");
            }
            Ok(())
        }
        Command::Reset { ref tenant } => {
            let orchestrator = build_orchestrator(&cli, store, default_template(&cli))?;
            orchestrator.reset(tenant).await?;
            println!(
                "channel for '{tenant}' re-opened at {}",
                ConnectionStatus::Initial.as_str()
            );
            Ok(())
        }
        Command::Status { ref tenant } => match store.get(tenant)? {
            Some(config) => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
            None => bail!("no channel settings for tenant '{tenant}'"),
        },
    }
}

fn build_orchestrator(
    cli: &Cli,
    store: SettingsStore,
    template: ProvisionTemplate,
) -> Result<ConnectOrchestrator> {
    let gateway = GatewayClient::new(&GatewayConfig {
        api_key: cli.api_key.clone(),
        request_timeout: Duration::from_millis(cli.request_timeout_ms),
        ..GatewayConfig::default()
    })?;
    Ok(ConnectOrchestrator::new(
        gateway,
        store,
        OrchestratorConfig {
            state_dir: cli.state_dir.clone(),
            template,
            poller: PollerConfig {
                interval: Duration::from_millis(cli.poll_interval_ms),
                max_duration: Duration::from_millis(cli.max_poll_ms),
            },
            push_events_url: cli.events_url.clone(),
            subscription_capacity: 64,
        },
    )?)
}

/// Template used by subcommands that never provision a fresh row.
fn default_template(cli: &Cli) -> ProvisionTemplate {
    ProvisionTemplate {
        gateway_base_url: cli.gateway_url.clone(),
        integration: IntegrationKind::WhatsappBaileys,
        webhook_url: None,
        webhook_events: Vec::new(),
    }
}

/// Renders updates until the channel reaches a terminal state, or until the
/// user interrupts, in which case the attempt is cancelled before returning.
async fn follow_to_terminal(
    orchestrator: &ConnectOrchestrator,
    tenant_id: &str,
    updates: &mut broadcast::Receiver<ConnectUpdate>,
    qr_file: Option<&Path>,
) -> Result<()> {
    let mut pairing_code_shown = false;
    let mut qr_written = false;
    loop {
        tokio::select! {
            update = updates.recv() => {
                let update = match update {
                    Ok(update) => update,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "dropped status updates while rendering");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        bail!("status subscription closed before a terminal state");
                    }
                };
                println!("{tenant_id}: {}", update.status.as_str());
                if let Some(credentials) = update.credentials.as_ref() {
                    if !pairing_code_shown {
                        if let Some(code) = credentials.pairing_code.as_deref() {
                            println!("  pairing code: {code}");
                            pairing_code_shown = true;
                        }
                    }
                    if !qr_written {
                        if let Some(path) = qr_file {
                            qr_written = write_qr_file(path, credentials)?;
                        }
                    }
                }
                match update.status {
                    ConnectionStatus::Connected | ConnectionStatus::Initial => return Ok(()),
                    ConnectionStatus::Error => {
                        let detail = update.error.as_deref().unwrap_or("unknown error");
                        bail!("connection for tenant '{tenant_id}' failed: {detail}");
                    }
                    _ => {}
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for interrupt signal")?;
                orchestrator.cancel(tenant_id).await;
                bail!("interrupted; attempt for tenant '{tenant_id}' stopped");
            }
        }
    }
}

fn write_qr_file(path: &Path, credentials: &PairingCredentials) -> Result<bool> {
    let Some(bytes) = credentials.decode_scan_png() else {
        return Ok(false);
    };
    write_bytes_atomic(path, &bytes)
        .with_context(|| format!("failed to write QR image to {}", path.display()))?;
    println!("  QR image written to {}", path.display());
    Ok(true)
}
