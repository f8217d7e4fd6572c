//! Bounded, cancellable polling loop over the gateway state probe.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use tether_gateway::{GatewayClient, InstanceTarget, RemoteSessionState};

use crate::connect_events::{ResolutionSource, WatchEvent};

/// Timing knobs for the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Gap between probes. The first probe fires one full interval after the
    /// loop starts, never immediately; the gateway may still be processing
    /// the create call.
    pub interval: Duration,
    /// Wall-clock ceiling for the whole loop.
    pub max_duration: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_duration: Duration::from_secs(120),
        }
    }
}

/// Spawns the poll loop as a sibling task under the attempt's cancellation
/// scope. The loop exits after emitting an open observation, after emitting
/// the terminal timeout signal, on cancellation, or once the consumer drops
/// the fan-in channel.
pub fn spawn_state_poller(
    gateway: GatewayClient,
    target: InstanceTarget,
    config: PollerConfig,
    events_tx: mpsc::Sender<WatchEvent>,
    cancel_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_state_poller(gateway, target, config, events_tx, cancel_rx))
}

async fn run_state_poller(
    gateway: GatewayClient,
    target: InstanceTarget,
    config: PollerConfig,
    events_tx: mpsc::Sender<WatchEvent>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    if *cancel_rx.borrow() {
        return;
    }
    let started = tokio::time::Instant::now();
    let deadline = started + config.max_duration;
    let mut interval = tokio::time::interval_at(started + config.interval, config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if tokio::time::Instant::now() >= deadline {
                    let _ = events_tx.send(WatchEvent::TimedOut).await;
                    return;
                }
                match gateway.connection_state(&target).await {
                    Ok(state) => {
                        let open = state == RemoteSessionState::Open;
                        let event = WatchEvent::Observed {
                            state,
                            source: ResolutionSource::Poller,
                        };
                        if events_tx.send(event).await.is_err() || open {
                            return;
                        }
                    }
                    Err(error) => {
                        // A single failed probe is transient; the next tick
                        // retries. Only timeout or cancellation end the loop.
                        debug!(
                            instance = %target.instance_name,
                            error = %error,
                            "state probe failed; retrying next tick"
                        );
                        let event = WatchEvent::ProbeFailed {
                            detail: error.to_string(),
                        };
                        if events_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    return;
                }
            }
        }
    }
}
