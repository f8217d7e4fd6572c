//! Orchestrator facade driving per-tenant connection attempts.
//!
//! The facade owns a registry admitting at most one live attempt per tenant.
//! Each attempt runs as its own task: it persists every status transition
//! through the settings store, fans watcher observations into one channel,
//! and resolves on the first open observation, the polling budget expiring,
//! or cancellation. Subscribers follow transitions over a per-tenant
//! broadcast channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tether_core::current_unix_timestamp_ms;
use tether_gateway::{
    CreateOutcome, GatewayClient, GatewayError, InstanceTarget, PairingCredentials,
    RemoteSessionState,
};
use tether_store::{ChannelConfig, ConnectionStatus, ProvisionTemplate, SettingsStore};

use crate::connect_events::{ConnectUpdate, ResolutionSource, WatchEvent};
use crate::connect_journal::AttemptJournal;
use crate::connect_poller::{spawn_state_poller, PollerConfig};
use crate::connect_push::spawn_push_listener;

const MIN_SUBSCRIBER_NUMBER_DIGITS: usize = 10;

static ATTEMPT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Typed error surface of the facade operations.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid subscriber number: {0}")]
    InvalidNumber(String),
    #[error("a connection attempt is already running for tenant '{tenant_id}'")]
    AttemptInProgress { tenant_id: String },
    #[error("tenant '{tenant_id}' is already connected; reset the channel before reconnecting")]
    AlreadyConnected { tenant_id: String },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Reduces a raw subscriber number to its digits.
///
/// Rejection happens here, synchronously, before the caller has touched the
/// store or the gateway.
pub fn normalize_subscriber_number(raw: &str) -> Result<String, ConnectError> {
    let digits = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect::<String>();
    if digits.len() < MIN_SUBSCRIBER_NUMBER_DIGITS {
        return Err(ConnectError::InvalidNumber(format!(
            "expected at least {MIN_SUBSCRIBER_NUMBER_DIGITS} digits, found {}",
            digits.len()
        )));
    }
    Ok(digits)
}

/// Orchestrator settings beyond the injected gateway client and store.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory holding the attempt journal (the settings database usually
    /// lives here too).
    pub state_dir: PathBuf,
    /// Instance settings applied when a tenant's row is first created.
    pub template: ProvisionTemplate,
    pub poller: PollerConfig,
    /// WebSocket endpoint for push connection updates; the listener is never
    /// spawned when absent.
    pub push_events_url: Option<String>,
    /// Buffer size of each tenant's update broadcast.
    pub subscription_capacity: usize,
}

enum AttemptPlan {
    /// Full pass for a fresh connect call: persist CREATING with the number,
    /// provision the instance, then run the pairing tail.
    Provision { subscriber_number: String },
    /// Resume path for an instance that already exists: rerun only the
    /// pairing tail, never trusting previously issued credentials.
    RefreshPairing,
}

enum AttemptError {
    Cancelled,
    Failed(String),
}

impl AttemptError {
    fn failed(error: impl std::fmt::Display) -> Self {
        Self::Failed(error.to_string())
    }
}

/// How the watcher fan-in resolved.
#[derive(Debug, PartialEq, Eq)]
enum WatchResolution {
    Open { source: ResolutionSource },
    TimedOut,
    Cancelled,
    /// Every watcher exited without an open observation or a timeout.
    Exhausted,
}

struct AttemptHandle {
    attempt_id: String,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct TenantChannel {
    attempt: Option<AttemptHandle>,
    updates_tx: broadcast::Sender<ConnectUpdate>,
    latest: Option<ConnectUpdate>,
}

impl TenantChannel {
    fn new(capacity: usize) -> Self {
        let (updates_tx, _initial_rx) = broadcast::channel(capacity);
        Self {
            attempt: None,
            updates_tx,
            latest: None,
        }
    }
}

struct OrchestratorInner {
    store: SettingsStore,
    gateway: GatewayClient,
    journal: AttemptJournal,
    template: ProvisionTemplate,
    poller: PollerConfig,
    push_events_url: Option<String>,
    subscription_capacity: usize,
    channels: Mutex<HashMap<String, TenantChannel>>,
}

impl OrchestratorInner {
    fn lock_channels(&self) -> MutexGuard<'_, HashMap<String, TenantChannel>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn has_live_attempt(&self, tenant_id: &str) -> bool {
        attempt_is_live(&self.lock_channels(), tenant_id)
    }

    fn publish_update(&self, tenant_id: &str, update: ConnectUpdate) {
        let mut channels = self.lock_channels();
        let entry = channels
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantChannel::new(self.subscription_capacity));
        entry.latest = Some(update.clone());
        // Send fails only when nobody is subscribed; the cached copy still
        // serves late subscribers via resume.
        let _ = entry.updates_tx.send(update);
    }
}

/// Facade over connect, resume, cancel, and reset for tenant channels.
///
/// Cheap to clone; all clones share the attempt registry.
#[derive(Clone)]
pub struct ConnectOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl ConnectOrchestrator {
    pub fn new(
        gateway: GatewayClient,
        store: SettingsStore,
        config: OrchestratorConfig,
    ) -> Result<Self, ConnectError> {
        let journal = AttemptJournal::open_in(&config.state_dir)?;
        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                store,
                gateway,
                journal,
                template: config.template,
                poller: config.poller,
                push_events_url: config.push_events_url,
                subscription_capacity: config.subscription_capacity.max(1),
                channels: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Starts a connection attempt for the tenant and returns immediately;
    /// progress flows through the status subscription.
    ///
    /// The number is validated before any persistence or remote call. A
    /// tenant already holding a live attempt or a persisted CONNECTED row is
    /// rejected; rows stranded mid-attempt by a crash are taken over by the
    /// fresh attempt.
    pub fn connect(&self, tenant_id: &str, subscriber_number: &str) -> Result<(), ConnectError> {
        let tenant_id = tenant_id.trim();
        let subscriber_number = normalize_subscriber_number(subscriber_number)?;
        if self.inner.has_live_attempt(tenant_id) {
            return Err(ConnectError::AttemptInProgress {
                tenant_id: tenant_id.to_string(),
            });
        }
        if let Some(existing) = self.inner.store.get(tenant_id)? {
            if existing.status == ConnectionStatus::Connected {
                return Err(ConnectError::AlreadyConnected {
                    tenant_id: tenant_id.to_string(),
                });
            }
        }
        self.inner.store.create(tenant_id, &self.inner.template)?;
        self.spawn_attempt(tenant_id, AttemptPlan::Provision { subscriber_number })
    }

    /// Reconciles a re-attaching caller against persisted state.
    ///
    /// CONNECTED re-emits with no remote calls. A row stranded at PENDING or
    /// CONNECTING gets one state probe: open goes straight to CONNECTED,
    /// anything else restarts the pairing tail with fresh credentials. Other
    /// statuses re-emit as persisted, and a missing row emits INITIAL. When
    /// an attempt is already live in-process the latest cached update is
    /// re-emitted and the attempt keeps running.
    pub async fn resume(&self, tenant_id: &str) -> Result<(), ConnectError> {
        let tenant_id = tenant_id.trim();
        if self.inner.has_live_attempt(tenant_id) {
            return self.yield_to_live_attempt(tenant_id);
        }
        let Some(config) = self.inner.store.get(tenant_id)? else {
            self.inner
                .publish_update(tenant_id, ConnectUpdate::status_only(ConnectionStatus::Initial));
            return Ok(());
        };
        match config.status {
            ConnectionStatus::Connected => {
                self.inner.publish_update(
                    tenant_id,
                    ConnectUpdate::status_only(ConnectionStatus::Connected),
                );
                Ok(())
            }
            status if status.is_mid_attempt() => self.reconcile_mid_attempt(tenant_id, config).await,
            ConnectionStatus::Error => {
                let detail = config
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "error".to_string());
                self.inner
                    .publish_update(tenant_id, ConnectUpdate::failed(detail));
                Ok(())
            }
            status => {
                self.inner
                    .publish_update(tenant_id, ConnectUpdate::status_only(status));
                Ok(())
            }
        }
    }

    /// Stops the tenant's live attempt, if any, and waits for it to finish.
    ///
    /// Persists nothing: the row keeps whatever status the attempt last
    /// wrote. Returns whether a running attempt was actually stopped.
    pub async fn cancel(&self, tenant_id: &str) -> bool {
        let attempt = {
            let mut channels = self.inner.lock_channels();
            channels
                .get_mut(tenant_id.trim())
                .and_then(|entry| entry.attempt.take())
        };
        let Some(attempt) = attempt else {
            return false;
        };
        let was_live = !attempt.task.is_finished();
        let _ = attempt.cancel_tx.send(true);
        let _ = attempt.task.await;
        if was_live {
            self.inner
                .journal
                .record(tenant_id.trim(), &attempt.attempt_id, "attempt_cancelled", None);
        }
        was_live
    }

    /// Cancels any live attempt and re-opens the tenant's row at INITIAL,
    /// clearing the subscriber number and the stored diagnostic.
    pub async fn reset(&self, tenant_id: &str) -> Result<(), ConnectError> {
        let tenant_id = tenant_id.trim();
        self.cancel(tenant_id).await;
        self.inner.store.reset(tenant_id)?;
        self.inner
            .publish_update(tenant_id, ConnectUpdate::status_only(ConnectionStatus::Initial));
        Ok(())
    }

    /// Subscribes to the tenant's status transitions.
    pub fn subscribe(&self, tenant_id: &str) -> broadcast::Receiver<ConnectUpdate> {
        let mut channels = self.inner.lock_channels();
        let entry = channels
            .entry(tenant_id.trim().to_string())
            .or_insert_with(|| TenantChannel::new(self.inner.subscription_capacity));
        entry.updates_tx.subscribe()
    }

    /// Latest update published for the tenant in this process, if any.
    pub fn latest_update(&self, tenant_id: &str) -> Option<ConnectUpdate> {
        let channels = self.inner.lock_channels();
        channels
            .get(tenant_id.trim())
            .and_then(|entry| entry.latest.clone())
    }

    /// Reads the tenant's persisted settings row.
    pub fn settings(&self, tenant_id: &str) -> Result<Option<ChannelConfig>, ConnectError> {
        Ok(self.inner.store.get(tenant_id.trim())?)
    }

    /// Cancels every live attempt; called when the owning process shuts
    /// down.
    pub async fn shutdown(&self) {
        let attempts = {
            let mut channels = self.inner.lock_channels();
            channels
                .values_mut()
                .filter_map(|entry| entry.attempt.take())
                .collect::<Vec<_>>()
        };
        for attempt in &attempts {
            let _ = attempt.cancel_tx.send(true);
        }
        for attempt in attempts {
            let _ = attempt.task.await;
        }
    }

    async fn reconcile_mid_attempt(
        &self,
        tenant_id: &str,
        config: ChannelConfig,
    ) -> Result<(), ConnectError> {
        let target = config.instance_target();
        let attempt_id = next_attempt_id();
        match self.inner.gateway.connection_state(&target).await {
            Ok(RemoteSessionState::Open) => {
                // Re-check liveness and persist under one registry lock: a
                // connect admitted while the probe was in flight owns the
                // row's transitions now.
                let persisted = {
                    let channels = self.inner.lock_channels();
                    if attempt_is_live(&channels, tenant_id) {
                        false
                    } else {
                        self.inner.store.update_status(
                            tenant_id,
                            ConnectionStatus::Connected,
                            None,
                            None,
                        )?;
                        true
                    }
                };
                if !persisted {
                    debug!(
                        tenant = tenant_id,
                        "resume probe raced a fresh attempt; leaving it to resolve"
                    );
                    return self.yield_to_live_attempt(tenant_id);
                }
                self.inner
                    .journal
                    .record(tenant_id, &attempt_id, "resume_confirmed_open", None);
                register_webhook_best_effort(&self.inner, tenant_id, &attempt_id, &target, &config)
                    .await;
                self.inner.publish_update(
                    tenant_id,
                    ConnectUpdate::status_only(ConnectionStatus::Connected),
                );
                Ok(())
            }
            Ok(state) => {
                debug!(
                    tenant = tenant_id,
                    state = state.as_str(),
                    "resume probe found session not open; restarting pairing"
                );
                self.inner.journal.record(
                    tenant_id,
                    &attempt_id,
                    "resume_restarted_pairing",
                    Some(state.as_str()),
                );
                match self.spawn_attempt(tenant_id, AttemptPlan::RefreshPairing) {
                    Err(ConnectError::AttemptInProgress { .. }) => {
                        self.yield_to_live_attempt(tenant_id)
                    }
                    result => result,
                }
            }
            Err(error) => {
                debug!(
                    tenant = tenant_id,
                    error = %error,
                    "resume probe failed; restarting pairing"
                );
                self.inner.journal.record(
                    tenant_id,
                    &attempt_id,
                    "resume_restarted_pairing",
                    Some(&error.to_string()),
                );
                match self.spawn_attempt(tenant_id, AttemptPlan::RefreshPairing) {
                    Err(ConnectError::AttemptInProgress { .. }) => {
                        self.yield_to_live_attempt(tenant_id)
                    }
                    result => result,
                }
            }
        }
    }

    /// Resume's answer when an attempt got admitted under it: re-emit the
    /// latest cached update and let the attempt drive the row.
    fn yield_to_live_attempt(&self, tenant_id: &str) -> Result<(), ConnectError> {
        if let Some(update) = self.latest_update(tenant_id) {
            self.inner.publish_update(tenant_id, update);
        }
        Ok(())
    }

    /// Admits and spawns an attempt task. Admission and registration happen
    /// under one registry lock so two callers can never both win.
    fn spawn_attempt(&self, tenant_id: &str, plan: AttemptPlan) -> Result<(), ConnectError> {
        let mut channels = self.inner.lock_channels();
        let entry = channels
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantChannel::new(self.inner.subscription_capacity));
        if entry
            .attempt
            .as_ref()
            .is_some_and(|attempt| !attempt.task.is_finished())
        {
            return Err(ConnectError::AttemptInProgress {
                tenant_id: tenant_id.to_string(),
            });
        }
        let attempt_id = next_attempt_id();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection_attempt(
            Arc::clone(&self.inner),
            tenant_id.to_string(),
            attempt_id.clone(),
            plan,
            cancel_rx,
        ));
        entry.attempt = Some(AttemptHandle {
            attempt_id,
            cancel_tx,
            task,
        });
        Ok(())
    }
}

fn attempt_is_live(channels: &HashMap<String, TenantChannel>, tenant_id: &str) -> bool {
    channels
        .get(tenant_id)
        .and_then(|entry| entry.attempt.as_ref())
        .map(|attempt| !attempt.task.is_finished())
        .unwrap_or(false)
}

fn next_attempt_id() -> String {
    let sequence = ATTEMPT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("attempt-{}-{sequence}", current_unix_timestamp_ms())
}

async fn run_connection_attempt(
    inner: Arc<OrchestratorInner>,
    tenant_id: String,
    attempt_id: String,
    plan: AttemptPlan,
    mut cancel_rx: watch::Receiver<bool>,
) {
    match drive_connection_attempt(&inner, &tenant_id, &attempt_id, plan, &mut cancel_rx).await {
        Ok(()) => {}
        Err(AttemptError::Cancelled) => {
            debug!(tenant = %tenant_id, "connection attempt stopped before resolving");
        }
        Err(AttemptError::Failed(message)) => {
            inner
                .journal
                .record(&tenant_id, &attempt_id, "attempt_failed", Some(&message));
            if let Err(error) = inner.store.update_status(
                &tenant_id,
                ConnectionStatus::Error,
                None,
                Some(&message),
            ) {
                warn!(
                    tenant = %tenant_id,
                    error = %error,
                    "failed to persist ERROR status after attempt failure"
                );
            }
            inner.publish_update(&tenant_id, ConnectUpdate::failed(message));
        }
    }
}

async fn drive_connection_attempt(
    inner: &Arc<OrchestratorInner>,
    tenant_id: &str,
    attempt_id: &str,
    plan: AttemptPlan,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<(), AttemptError> {
    let Some(mut config) = inner.store.get(tenant_id).map_err(AttemptError::failed)? else {
        return Err(AttemptError::Failed(format!(
            "no channel settings row for tenant '{tenant_id}'"
        )));
    };

    match plan {
        AttemptPlan::Provision { subscriber_number } => {
            inner
                .journal
                .record(tenant_id, attempt_id, "attempt_started", Some("provision"));
            inner
                .store
                .update_status(
                    tenant_id,
                    ConnectionStatus::Creating,
                    Some(&subscriber_number),
                    None,
                )
                .map_err(AttemptError::failed)?;
            config.subscriber_number = Some(subscriber_number);
            inner.publish_update(
                tenant_id,
                ConnectUpdate::status_only(ConnectionStatus::Creating),
            );
            if *cancel_rx.borrow() {
                return Err(AttemptError::Cancelled);
            }

            let outcome = inner
                .gateway
                .create_instance(&config.instance_target())
                .await
                .map_err(AttemptError::failed)?;
            let event = match outcome {
                CreateOutcome::Accepted => "instance_created",
                CreateOutcome::AlreadyExists => "instance_already_exists",
            };
            inner.journal.record(tenant_id, attempt_id, event, None);
        }
        AttemptPlan::RefreshPairing => {
            inner.journal.record(
                tenant_id,
                attempt_id,
                "attempt_started",
                Some("refresh_pairing"),
            );
        }
    }
    if *cancel_rx.borrow() {
        return Err(AttemptError::Cancelled);
    }

    run_pairing_tail(inner, tenant_id, attempt_id, &config, cancel_rx).await
}

/// The shared back half of an attempt: PENDING, credentials, CONNECTING,
/// watchers, resolution.
async fn run_pairing_tail(
    inner: &Arc<OrchestratorInner>,
    tenant_id: &str,
    attempt_id: &str,
    config: &ChannelConfig,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<(), AttemptError> {
    let target = config.instance_target();

    inner
        .store
        .update_status(tenant_id, ConnectionStatus::Pending, None, None)
        .map_err(AttemptError::failed)?;
    inner.publish_update(
        tenant_id,
        ConnectUpdate::status_only(ConnectionStatus::Pending),
    );

    let credentials = fetch_credentials_with_recreate(inner, tenant_id, attempt_id, &target).await?;
    inner
        .journal
        .record(tenant_id, attempt_id, "credentials_fetched", None);
    inner.publish_update(
        tenant_id,
        ConnectUpdate::with_credentials(ConnectionStatus::Pending, credentials.clone()),
    );
    if *cancel_rx.borrow() {
        return Err(AttemptError::Cancelled);
    }

    inner
        .store
        .update_status(tenant_id, ConnectionStatus::Connecting, None, None)
        .map_err(AttemptError::failed)?;
    inner.publish_update(
        tenant_id,
        ConnectUpdate::with_credentials(ConnectionStatus::Connecting, credentials),
    );

    // Watchers fan into one channel; the attempt task is the sole consumer,
    // which is what makes the CONNECTED transition exactly-once.
    let (watch_cancel_tx, watch_cancel_rx) = watch::channel(false);
    let (events_tx, mut events_rx) = mpsc::channel(8);
    let poller = spawn_state_poller(
        inner.gateway.clone(),
        target.clone(),
        inner.poller.clone(),
        events_tx.clone(),
        watch_cancel_rx.clone(),
    );
    let push_listener = inner.push_events_url.clone().map(|events_url| {
        spawn_push_listener(
            events_url,
            target.instance_name.clone(),
            events_tx.clone(),
            watch_cancel_rx,
        )
    });
    drop(events_tx);
    inner
        .journal
        .record(tenant_id, attempt_id, "watchers_started", None);

    let resolution = resolve_first_open(&mut events_rx, cancel_rx).await;

    // Late signals after this point land in a dropped channel.
    drop(events_rx);
    let _ = watch_cancel_tx.send(true);
    let _ = poller.await;
    if let Some(listener) = push_listener {
        let _ = listener.await;
    }

    match resolution {
        WatchResolution::Open { source } => {
            inner
                .journal
                .record(tenant_id, attempt_id, "open_observed", Some(source.as_str()));
            inner
                .store
                .update_status(tenant_id, ConnectionStatus::Connected, None, None)
                .map_err(AttemptError::failed)?;
            inner
                .journal
                .record(tenant_id, attempt_id, "connected_persisted", None);
            register_webhook_best_effort(inner, tenant_id, attempt_id, &target, config).await;
            inner.publish_update(
                tenant_id,
                ConnectUpdate::status_only(ConnectionStatus::Connected),
            );
            Ok(())
        }
        WatchResolution::TimedOut => {
            inner.journal.record(
                tenant_id,
                attempt_id,
                "attempt_timed_out",
                Some(&format!(
                    "no open session within {}ms",
                    inner.poller.max_duration.as_millis()
                )),
            );
            Err(AttemptError::Failed("timeout".to_string()))
        }
        WatchResolution::Cancelled => Err(AttemptError::Cancelled),
        WatchResolution::Exhausted => Err(AttemptError::Failed(
            "connection watchers exited before resolving".to_string(),
        )),
    }
}

/// Consumes watcher observations until one resolves the attempt.
///
/// The first open observation wins; any open reported by the other watcher
/// afterwards is never consumed. Non-open observations and probe failures
/// keep the wait going.
async fn resolve_first_open(
    events_rx: &mut mpsc::Receiver<WatchEvent>,
    cancel_rx: &mut watch::Receiver<bool>,
) -> WatchResolution {
    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(WatchEvent::Observed { state: RemoteSessionState::Open, source }) => {
                    return WatchResolution::Open { source };
                }
                Some(WatchEvent::Observed { .. }) | Some(WatchEvent::ProbeFailed { .. }) => {}
                Some(WatchEvent::TimedOut) => return WatchResolution::TimedOut,
                None => return WatchResolution::Exhausted,
            },
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    return WatchResolution::Cancelled;
                }
            }
        }
    }
}

/// Fetches pairing credentials, recreating the remote instance exactly once
/// if the gateway reports it missing.
async fn fetch_credentials_with_recreate(
    inner: &OrchestratorInner,
    tenant_id: &str,
    attempt_id: &str,
    target: &InstanceTarget,
) -> Result<PairingCredentials, AttemptError> {
    match inner.gateway.fetch_pairing_credentials(target).await {
        Ok(credentials) => Ok(credentials),
        Err(GatewayError::InstanceMissing) => {
            inner
                .journal
                .record(tenant_id, attempt_id, "instance_recreated", None);
            inner
                .gateway
                .create_instance(target)
                .await
                .map_err(AttemptError::failed)?;
            inner
                .gateway
                .fetch_pairing_credentials(target)
                .await
                .map_err(AttemptError::failed)
        }
        Err(error) => Err(AttemptError::failed(error)),
    }
}

/// Registers the inbound webhook when the row carries a target. Failures are
/// journaled and logged; a connected channel never regresses over them.
async fn register_webhook_best_effort(
    inner: &OrchestratorInner,
    tenant_id: &str,
    attempt_id: &str,
    target: &InstanceTarget,
    config: &ChannelConfig,
) {
    let Some(webhook_url) = config.webhook_url.as_deref() else {
        return;
    };
    match inner
        .gateway
        .register_webhook(target, webhook_url, &config.webhook_events)
        .await
    {
        Ok(()) => {
            inner
                .journal
                .record(tenant_id, attempt_id, "webhook_registered", None);
        }
        Err(error) => {
            warn!(
                tenant = tenant_id,
                error = %error,
                "webhook registration failed; channel stays connected"
            );
            inner.journal.record(
                tenant_id,
                attempt_id,
                "webhook_registration_failed",
                Some(&error.to_string()),
            );
        }
    }
}
