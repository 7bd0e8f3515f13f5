//! Multi-node convergence over the in-memory network.

use std::sync::Arc;
use std::time::Duration;

use banshee_cluster::Member;
use banshee_model::{Acknowledgement, Alert, AlertStatus, Labels, Matcher, Silence};
use banshee_pipeline::{BufferedStore, StoreEventDelegate};
use banshee_proto::{LogEntry, WireAck, WireAlert, WireSilence};
use banshee_replication::core::{RaftConfig, RaftHandle, Role, spawn};
use banshee_replication::state_machine::AlertStateMachine;
use banshee_replication::transport::InMemoryNetwork;
use banshee_store::filter::AllAlerts;
use banshee_store::{MemoryStore, Store};
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant;

struct Node {
    handle: RaftHandle,
    store: Arc<MemoryStore>,
    buffer: Arc<BufferedStore>,
}

fn spawn_cluster(size: usize, shutdown: &broadcast::Sender<()>) -> Vec<Node> {
    let network = InMemoryNetwork::new();
    let roster: Vec<Member> = (0..size)
        .map(|i| Member::new(format!("node-{i}"), format!("mem://node-{i}")))
        .collect();

    roster
        .iter()
        .map(|member| {
            let store = Arc::new(MemoryStore::new());
            let buffer = Arc::new(BufferedStore::new(
                store.clone(),
                16,
                Duration::from_millis(50),
            ));
            let delegate = Arc::new(StoreEventDelegate::new(store.clone(), buffer.clone()));
            let machine = Arc::new(AlertStateMachine::new(
                delegate,
                store.clone(),
                buffer.clone(),
            ));

            let config =
                RaftConfig::new(&member.name, &member.address).with_peers(roster.clone());
            let (handle, _) = spawn(config, machine, network.transport(), shutdown);
            network.register(&member.address, handle.clone());

            Node {
                handle,
                store,
                buffer,
            }
        })
        .collect()
}

/// Waits until one node leads and every node knows who the leader is.
async fn wait_for_leader(nodes: &[Node]) -> usize {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let mut leader = None;
        let mut aware = 0;
        for (i, node) in nodes.iter().enumerate() {
            if let Ok(status) = node.handle.status().await {
                if status.role == Role::Leader {
                    leader = Some(i);
                }
                if status.leader.is_some() {
                    aware += 1;
                }
            }
        }
        if let Some(i) = leader
            && aware == nodes.len()
        {
            return i;
        }
        assert!(Instant::now() < deadline, "no leader elected in time");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Waits until `check` passes on every node, flushing write buffers
/// between polls.
async fn wait_for_all(nodes: &[Node], check: impl Fn(&Node) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        for node in nodes {
            let _ = node.buffer.flush();
        }
        if nodes.iter().all(&check) {
            return;
        }
        assert!(Instant::now() < deadline, "nodes did not converge in time");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn firing_alert(name: &str) -> Alert {
    Alert::new(Labels::from([("alertname", name)])).with_status(AlertStatus::Firing)
}

#[tokio::test]
async fn alerts_replicate_to_every_node() {
    let (shutdown, _) = broadcast::channel(1);
    let nodes = spawn_cluster(3, &shutdown);
    let leader = wait_for_leader(&nodes).await;

    // Propose through a follower so the forward path is exercised.
    let follower = (leader + 1) % nodes.len();
    let entry = LogEntry::post_alerts(
        "node-x",
        vec![WireAlert::from_model(&firing_alert("disk_full"))],
    );
    nodes[follower].handle.propose(entry).await.unwrap();

    wait_for_all(&nodes, |node| node.store.alert_count() == 1).await;
    let _ = shutdown.send(());
}

#[tokio::test]
async fn silences_suppress_matching_alerts_cluster_wide() {
    let (shutdown, _) = broadcast::channel(1);
    let nodes = spawn_cluster(3, &shutdown);
    let leader = wait_for_leader(&nodes).await;

    let silence = Silence::new(
        "ops",
        "maintenance window",
        Some(Utc::now() + chrono::Duration::hours(1)),
        vec![Matcher::equal("alertname", "disk_full")],
    );
    let entry = LogEntry::post_silences("node-x", vec![WireSilence::from_model(&silence)]);
    nodes[leader].handle.propose(entry).await.unwrap();

    let entry = LogEntry::post_alerts(
        "node-x",
        vec![WireAlert::from_model(&firing_alert("disk_full"))],
    );
    nodes[leader].handle.propose(entry).await.unwrap();

    wait_for_all(&nodes, |node| {
        node.store
            .query_alerts(&AllAlerts)
            .first()
            .is_some_and(|alert| alert.status == AlertStatus::Silenced)
    })
    .await;
    let _ = shutdown.send(());
}

#[tokio::test]
async fn acknowledgements_attach_on_every_node() {
    let (shutdown, _) = broadcast::channel(1);
    let nodes = spawn_cluster(3, &shutdown);
    let leader = wait_for_leader(&nodes).await;

    let alert = firing_alert("cpu_high");
    let alert_id = alert.id();
    let entry = LogEntry::post_alerts("node-x", vec![WireAlert::from_model(&alert)]);
    nodes[leader].handle.propose(entry).await.unwrap();

    let ack = Acknowledgement {
        acked_by: "ops".to_string(),
        comment: "investigating".to_string(),
    };
    let entry = LogEntry::post_ack("node-x", alert_id, WireAck::from(&ack));
    nodes[leader].handle.propose(entry).await.unwrap();

    wait_for_all(&nodes, |node| {
        node.store
            .query_alerts(&AllAlerts)
            .first()
            .is_some_and(|alert| {
                alert.status == AlertStatus::Acked && alert.acknowledgement.is_some()
            })
    })
    .await;
    let _ = shutdown.send(());
}

#[tokio::test]
async fn late_joiner_catches_up_from_the_log() {
    let (shutdown, _) = broadcast::channel(1);
    let nodes = spawn_cluster(3, &shutdown);
    let leader = wait_for_leader(&nodes).await;

    for i in 0..5 {
        let entry = LogEntry::post_alerts(
            "node-x",
            vec![WireAlert::from_model(&firing_alert(&format!("alert-{i}")))],
        );
        nodes[leader].handle.propose(entry).await.unwrap();
    }

    // The leader keeps retrying followers every heartbeat, so even a
    // node that missed the initial appends converges.
    wait_for_all(&nodes, |node| node.store.alert_count() == 5).await;

    for node in &nodes {
        let status = node.handle.status().await.unwrap();
        assert_eq!(status.last_applied, status.commit_index);
    }
    let _ = shutdown.send(());
}
