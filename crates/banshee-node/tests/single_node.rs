//! End-to-end: one node from ingest to notification to silencing.

use std::time::Duration;

use banshee_model::{Alert, AlertStatus, Labels, Matcher, Silence};
use banshee_node::{Node, NodeConfig, NodeRuntime};
use banshee_replication::core::Role;
use banshee_store::Store;
use banshee_store::filter::ExactLabels;
use chrono::Utc;
use tokio::time::Instant;

fn fast_config() -> NodeConfig {
    // Port 0 is fine here: nothing dials a single-node cluster.
    let mut config = NodeConfig::new("node-0", "127.0.0.1:0");
    config.buffer_flush_interval_ms = 20;
    config.timeout_tick_ms = 50;
    config.notify_tick_ms = 50;
    config.election_timeout_min_ms = 50;
    config.election_timeout_max_ms = 100;
    config.heartbeat_interval_ms = 25;
    config
}

async fn wait_for_leadership(runtime: &NodeRuntime) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(status) = runtime.raft().status().await
            && status.role == Role::Leader
        {
            return;
        }
        assert!(Instant::now() < deadline, "node never took leadership");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Waits until the stored alert with the given labels satisfies
/// `check`, flushing the write buffer between polls.
async fn wait_for_alert(
    runtime: &NodeRuntime,
    labels: &Labels,
    check: impl Fn(&Alert) -> bool,
) -> Alert {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let _ = runtime.buffer().flush();
        let alerts = runtime
            .store()
            .query_alerts(&ExactLabels::new(labels.clone()));
        if let Some(alert) = alerts.into_iter().find(|alert| check(alert)) {
            return alert;
        }
        assert!(Instant::now() < deadline, "alert never reached the state");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn ingested_alert_fires_and_matching_silence_suppresses_it() {
    let node = Node::new(fast_config()).unwrap();
    let shutdown = node.shutdown_handle();
    let runtime = node.start().unwrap();
    wait_for_leadership(&runtime).await;

    // A processing observation is picked up by the notify sweep,
    // delivered, and re-broadcast as firing with a notify time.
    let labels = Labels::from([("alertname", "disk_full"), ("service", "db")]);
    runtime
        .ingest_alerts(&[Alert::new(labels.clone())])
        .await
        .unwrap();

    let fired = wait_for_alert(&runtime, &labels, |alert| {
        alert.status == AlertStatus::Firing && alert.last_notified_at.is_some()
    })
    .await;
    assert_eq!(fired.authority_hint.as_deref(), Some("node-0"));

    // Silence the other service, then fire an alert under it.
    let silence = Silence::new(
        "ops",
        "maintenance window",
        Some(Utc::now() + chrono::Duration::hours(1)),
        vec![Matcher::equal("service", "cache")],
    );
    runtime.ingest_silences(&[silence]).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while runtime.store().silence_count() == 0 {
        let _ = runtime.buffer().flush();
        assert!(Instant::now() < deadline, "silence never stored");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let silenced_labels = Labels::from([("alertname", "evictions"), ("service", "cache")]);
    runtime
        .ingest_alerts(&[
            Alert::new(silenced_labels.clone()).with_status(AlertStatus::Firing),
        ])
        .await
        .unwrap();

    let silenced = wait_for_alert(&runtime, &silenced_labels, |alert| {
        alert.status == AlertStatus::Silenced
    })
    .await;
    assert!(silenced.last_notified_at.is_none(), "silenced alert notified");

    // The first alert is untouched by the unrelated silence.
    let untouched = wait_for_alert(&runtime, &labels, |_| true).await;
    assert_eq!(untouched.status, AlertStatus::Firing);

    shutdown.send(()).unwrap();
    runtime.join().await.unwrap();
}

#[tokio::test]
async fn shutdown_signal_stops_a_running_node() {
    let node = Node::new(fast_config()).unwrap();
    let shutdown = node.shutdown_handle();
    let runtime = node.start().unwrap();
    wait_for_leadership(&runtime).await;

    shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), runtime.join())
        .await
        .expect("node did not stop in time")
        .unwrap();
}

#[tokio::test]
async fn invalid_config_is_rejected_at_construction() {
    let config = NodeConfig::new("", "127.0.0.1:0");
    assert!(Node::new(config).is_err());
}
