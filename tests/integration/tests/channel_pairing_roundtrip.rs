use std::collections::BTreeSet;
use std::time::Duration;

use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::broadcast;

use tether_connect::{ConnectOrchestrator, ConnectUpdate, OrchestratorConfig, PollerConfig};
use tether_gateway::{GatewayClient, GatewayConfig, IntegrationKind};
use tether_store::{ConnectionStatus, ProvisionTemplate, SettingsStore};

const PROBE_INTERVAL: Duration = Duration::from_millis(50);

fn gateway_client() -> GatewayClient {
    GatewayClient::new(&GatewayConfig {
        api_key: "integration-secret".to_string(),
        request_timeout: Duration::from_millis(250),
        // no client-side retries, so mock call counts stay exact
        retry_max_attempts: 1,
        retry_base_delay: Duration::from_millis(5),
    })
    .expect("gateway client")
}

fn template_for(server: &MockServer, webhook_url: Option<String>) -> ProvisionTemplate {
    ProvisionTemplate {
        gateway_base_url: server.base_url(),
        integration: IntegrationKind::WhatsappBaileys,
        webhook_url,
        webhook_events: vec!["MESSAGES_UPSERT".to_string()],
    }
}

fn orchestrator_in(dir: &TempDir, template: ProvisionTemplate) -> ConnectOrchestrator {
    let store = SettingsStore::open(dir.path()).expect("settings store");
    ConnectOrchestrator::new(
        gateway_client(),
        store,
        OrchestratorConfig {
            state_dir: dir.path().to_path_buf(),
            template,
            poller: PollerConfig {
                interval: PROBE_INTERVAL,
                max_duration: Duration::from_secs(10),
            },
            push_events_url: None,
            subscription_capacity: 16,
        },
    )
    .expect("orchestrator")
}

async fn await_status(
    rx: &mut broadcast::Receiver<ConnectUpdate>,
    status: ConnectionStatus,
) -> ConnectUpdate {
    loop {
        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("update before deadline")
            .expect("subscription open");
        if update.status == status {
            return update;
        }
    }
}

fn journal_events(dir: &TempDir) -> Vec<Value> {
    let contents =
        std::fs::read_to_string(dir.path().join("connect-events.jsonl")).expect("journal file");
    contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("journal line is json"))
        .collect()
}

fn event_names(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .map(|event| event["event"].as_str().expect("event name").to_string())
        .collect()
}

fn distinct_attempt_ids(events: &[Value]) -> BTreeSet<String> {
    events
        .iter()
        .map(|event| event["attempt_id"].as_str().expect("attempt id").to_string())
        .collect()
}

#[tokio::test]
async fn integration_connect_pairs_tenant_end_to_end() {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method(POST).path("/instance/create");
        then.status(201)
            .json_body(json!({"instance": {"instanceName": "tenant-acme"}}));
    });
    let pairing = server.mock(|when, then| {
        when.method(GET).path("/instance/connect/tenant-acme");
        then.status(200).json_body(json!({
            "base64": "data:image/png;base64,iVBORw0KGgo=",
            "pairingCode": "WZYX-1234",
        }));
    });
    let state = server.mock(|when, then| {
        when.method(GET).path("/instance/connectionState/tenant-acme");
        then.status(200).json_body(json!({"instance": {"state": "open"}}));
    });
    let webhook = server.mock(|when, then| {
        when.method(POST).path("/webhook/set/tenant-acme");
        then.status(200).json_body(json!({}));
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator = orchestrator_in(
        &dir,
        template_for(&server, Some("https://hooks.example.test/acme".to_string())),
    );
    let mut updates = orchestrator.subscribe("acme");

    orchestrator
        .connect("acme", "+55 (11) 99999-0000")
        .expect("connect accepted");

    let connecting = await_status(&mut updates, ConnectionStatus::Connecting).await;
    let credentials = connecting
        .credentials
        .expect("pairing credentials accompany CONNECTING");
    assert_eq!(credentials.pairing_code.as_deref(), Some("WZYX-1234"));
    assert!(credentials.decode_scan_png().is_some());

    let connected = await_status(&mut updates, ConnectionStatus::Connected).await;
    assert!(connected.credentials.is_none());
    assert!(connected.error.is_none());

    orchestrator.shutdown().await;

    // A fresh handle sees the persisted outcome, as a restarted process would.
    let reopened = SettingsStore::open(dir.path()).expect("reopen store");
    let row = reopened.get("acme").expect("read").expect("row exists");
    assert_eq!(row.status, ConnectionStatus::Connected);
    assert_eq!(row.subscriber_number.as_deref(), Some("5511999990000"));
    assert_eq!(row.instance_name, "tenant-acme");
    assert!(row.last_error.is_none());

    create.assert_calls(1);
    pairing.assert_calls(1);
    state.assert_calls(1);
    webhook.assert_calls(1);

    let events = journal_events(&dir);
    let names = event_names(&events);
    for expected in [
        "attempt_started",
        "instance_created",
        "credentials_fetched",
        "watchers_started",
        "open_observed",
        "connected_persisted",
        "webhook_registered",
    ] {
        assert!(
            names.iter().any(|name| name == expected),
            "journal is missing {expected}: {names:?}"
        );
    }
    assert_eq!(
        distinct_attempt_ids(&events).len(),
        1,
        "one attempt wrote every journal line"
    );
}

#[tokio::test]
async fn integration_resume_after_restart_confirms_open_session() {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method(POST).path("/instance/create");
        then.status(201).json_body(json!({}));
    });
    let pairing = server.mock(|when, then| {
        when.method(GET).path("/instance/connect/tenant-acme");
        then.status(200).json_body(json!({"pairingCode": "WZYX-1234"}));
    });
    let state = server.mock(|when, then| {
        when.method(GET).path("/instance/connectionState/tenant-acme");
        then.status(200).json_body(json!({"instance": {"state": "open"}}));
    });

    let dir = tempfile::tempdir().expect("tempdir");
    // A previous process died mid-watch, leaving the row at CONNECTING.
    let seed = SettingsStore::open(dir.path()).expect("settings store");
    seed.create("acme", &template_for(&server, None))
        .expect("seed row");
    seed.update_status(
        "acme",
        ConnectionStatus::Connecting,
        Some("5511999990000"),
        None,
    )
    .expect("seed status");

    let orchestrator = orchestrator_in(&dir, template_for(&server, None));
    let mut updates = orchestrator.subscribe("acme");
    orchestrator.resume("acme").await.expect("resume accepted");

    let connected = await_status(&mut updates, ConnectionStatus::Connected).await;
    assert!(connected.error.is_none());

    orchestrator.shutdown().await;

    let row = seed.get("acme").expect("read").expect("row exists");
    assert_eq!(row.status, ConnectionStatus::Connected);

    state.assert_calls(1);
    create.assert_calls(0);
    pairing.assert_calls(0);

    let names = event_names(&journal_events(&dir));
    assert!(
        names.iter().any(|name| name == "resume_confirmed_open"),
        "journal records the confirmed resume: {names:?}"
    );
}

#[tokio::test]
async fn regression_cancelled_attempt_keeps_instance_identity_for_the_retry() {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method(POST).path("/instance/create");
        then.status(201).json_body(json!({}));
    });
    let pairing = server.mock(|when, then| {
        when.method(GET).path("/instance/connect/tenant-acme");
        then.status(200).json_body(json!({
            "base64": "data:image/png;base64,iVBORw0KGgo=",
            "pairingCode": "WZYX-1234",
        }));
    });
    let mut session_closed = server.mock(|when, then| {
        when.method(GET).path("/instance/connectionState/tenant-acme");
        then.status(200).json_body(json!({"instance": {"state": "close"}}));
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let orchestrator = orchestrator_in(&dir, template_for(&server, None));
    let mut updates = orchestrator.subscribe("acme");

    orchestrator
        .connect("acme", "5511999990000")
        .expect("first connect");
    await_status(&mut updates, ConnectionStatus::Connecting).await;
    assert!(orchestrator.cancel("acme").await, "attempt was live");

    let store = SettingsStore::open(dir.path()).expect("settings store");
    let paused = store.get("acme").expect("read").expect("row exists");
    assert_eq!(paused.status, ConnectionStatus::Connecting);

    // The remote session opens while nobody is watching.
    session_closed.delete();
    let session_open = server.mock(|when, then| {
        when.method(GET).path("/instance/connectionState/tenant-acme");
        then.status(200).json_body(json!({"instance": {"state": "open"}}));
    });

    orchestrator
        .connect("acme", "5511999990000")
        .expect("second connect");
    await_status(&mut updates, ConnectionStatus::Connected).await;
    orchestrator.shutdown().await;

    let row = store.get("acme").expect("read").expect("row exists");
    assert_eq!(row.status, ConnectionStatus::Connected);
    assert_eq!(row.instance_name, paused.instance_name);
    assert_eq!(row.instance_token, paused.instance_token);
    assert_eq!(row.created_at_unix_ms, paused.created_at_unix_ms);

    create.assert_calls(2);
    pairing.assert_calls(2);
    session_open.assert_calls(1);

    let events = journal_events(&dir);
    let names = event_names(&events);
    assert!(names.iter().any(|name| name == "attempt_cancelled"));
    assert!(names.iter().any(|name| name == "connected_persisted"));
    assert_eq!(
        distinct_attempt_ids(&events).len(),
        2,
        "the retry ran as its own attempt"
    );
}

#[tokio::test]
async fn regression_resume_probes_the_gateway_recorded_for_the_row() {
    let recorded = MockServer::start();
    let relocated = MockServer::start();
    let recorded_state = recorded.mock(|when, then| {
        when.method(GET).path("/instance/connectionState/tenant-acme");
        then.status(200).json_body(json!({"instance": {"state": "open"}}));
    });
    let relocated_state = relocated.mock(|when, then| {
        when.method(GET).path("/instance/connectionState/tenant-acme");
        then.status(200).json_body(json!({"instance": {"state": "open"}}));
    });

    let dir = tempfile::tempdir().expect("tempdir");
    // The row was provisioned against one gateway; a later process comes up
    // configured for another.
    let seed = SettingsStore::open(dir.path()).expect("settings store");
    seed.create("acme", &template_for(&recorded, None))
        .expect("seed row");
    seed.update_status(
        "acme",
        ConnectionStatus::Connecting,
        Some("5511999990000"),
        None,
    )
    .expect("seed status");

    let orchestrator = orchestrator_in(&dir, template_for(&relocated, None));
    let mut updates = orchestrator.subscribe("acme");
    orchestrator.resume("acme").await.expect("resume accepted");

    await_status(&mut updates, ConnectionStatus::Connected).await;
    orchestrator.shutdown().await;

    let row = seed.get("acme").expect("read").expect("row exists");
    assert_eq!(row.status, ConnectionStatus::Connected);

    recorded_state.assert_calls(1);
    relocated_state.assert_calls(0);
}
