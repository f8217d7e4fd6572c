//! Optional WebSocket push listener racing the poller to observe an open
//! session.
//!
//! Strictly a latency optimization: any connect, read, or parse failure
//! degrades silently and the poller remains the sole guarantee of forward
//! progress.

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::debug;

use tether_gateway::RemoteSessionState;

use crate::connect_events::{ResolutionSource, WatchEvent};

/// Spawns the push listener as a sibling of the poller under the attempt's
/// cancellation scope. Emits at most one event (an open observation) and
/// exits on any failure without reporting it.
pub fn spawn_push_listener(
    events_url: String,
    instance_name: String,
    events_tx: mpsc::Sender<WatchEvent>,
    cancel_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_push_listener(
        events_url,
        instance_name,
        events_tx,
        cancel_rx,
    ))
}

async fn run_push_listener(
    events_url: String,
    instance_name: String,
    events_tx: mpsc::Sender<WatchEvent>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    if *cancel_rx.borrow() {
        return;
    }
    let stream = tokio::select! {
        connected = connect_async(events_url.as_str()) => match connected {
            Ok((stream, _response)) => stream,
            Err(error) => {
                debug!(
                    instance = %instance_name,
                    error = %error,
                    "push listener failed to connect; polling remains authoritative"
                );
                return;
            }
        },
        changed = cancel_rx.changed() => {
            let _ = changed;
            return;
        }
    };
    let (_write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if frame_reports_instance_open(&text, &instance_name) {
                            let event = WatchEvent::Observed {
                                state: RemoteSessionState::Open,
                                source: ResolutionSource::PushListener,
                            };
                            let _ = events_tx.send(event).await;
                            return;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        debug!(
                            instance = %instance_name,
                            error = %error,
                            "push listener read failed; polling remains authoritative"
                        );
                        return;
                    }
                    None => return,
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

/// True when a push frame reports this instance's session open.
///
/// Frames are JSON text events; the instance name and state token appear
/// either at the top level or under a `data` envelope depending on the
/// gateway version. Anything unparseable is ignored.
fn frame_reports_instance_open(frame: &str, instance_name: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(frame) else {
        return false;
    };
    let Some(scope) = event_scope(&value) else {
        return false;
    };
    let named = ["instance", "instanceName"]
        .iter()
        .any(|key| scope.get(key).and_then(Value::as_str) == Some(instance_name));
    if !named {
        return false;
    }
    ["state", "connection"].iter().any(|key| {
        scope
            .get(key)
            .and_then(Value::as_str)
            .map(|token| token.trim().eq_ignore_ascii_case("open"))
            .unwrap_or(false)
    })
}

fn event_scope(value: &Value) -> Option<&Value> {
    if value.get("data").map(Value::is_object).unwrap_or(false) {
        return value.get("data");
    }
    value.is_object().then_some(value)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::{mpsc, watch};

    use super::*;

    #[test]
    fn unit_frame_sniffing_matches_flat_and_enveloped_shapes() {
        let flat = json!({
            "event": "connection.update",
            "instance": "tenant-acme",
            "state": "open",
        })
        .to_string();
        assert!(frame_reports_instance_open(&flat, "tenant-acme"));

        let enveloped = json!({
            "event": "connection.update",
            "data": {"instanceName": "tenant-acme", "connection": "open"},
        })
        .to_string();
        assert!(frame_reports_instance_open(&enveloped, "tenant-acme"));
    }

    #[test]
    fn unit_frame_sniffing_rejects_other_instances_and_states() {
        let other_instance = json!({"instance": "tenant-other", "state": "open"}).to_string();
        assert!(!frame_reports_instance_open(&other_instance, "tenant-acme"));

        let not_open = json!({"instance": "tenant-acme", "state": "connecting"}).to_string();
        assert!(!frame_reports_instance_open(&not_open, "tenant-acme"));

        assert!(!frame_reports_instance_open("not json", "tenant-acme"));
        assert!(!frame_reports_instance_open("[1, 2]", "tenant-acme"));
    }

    #[tokio::test]
    async fn functional_listener_degrades_silently_when_endpoint_unreachable() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let handle = spawn_push_listener(
            "ws://127.0.0.1:9".to_string(),
            "tenant-acme".to_string(),
            events_tx,
            cancel_rx,
        );

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("listener exit")
            .expect("join");
        assert!(events_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn functional_listener_stops_on_cancel() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = spawn_push_listener(
            "ws://10.255.255.1:80".to_string(),
            "tenant-acme".to_string(),
            events_tx,
            cancel_rx,
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_tx.send(true).expect("cancel");
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("prompt exit")
            .expect("join");
    }
}
