//! Broadcast hub behavior: snapshot stream, slow-subscriber eviction, and
//! management state over the dashboard topic.

use service_monitoring::broadcast::{SnapshotSource, SUBSCRIBER_BUFFER};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_dashboard_snapshot_reflects_status_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = harness().await;
    let uri = url::Url::parse(&server.uri()).unwrap();
    let def = http_service("api-prod", uri.host_str().unwrap(), uri.port().unwrap());

    harness.engine.check_service(&def).await;

    // Snapshot over the engine's own inventory requires start(); build one
    // directly against the live status store instead.
    let source = SnapshotSource {
        inventory: std::sync::Arc::new(tokio::sync::RwLock::new(vec![def.clone()])),
        status: harness.engine.status().clone(),
    };

    let snapshot = source.build().await;
    let groups = snapshot.as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["Title"], "WebModule");

    let row = &groups[0]["Data"][0];
    assert_eq!(row["Name"], "api-prod");
    assert_eq!(row["CurrentHealthCheck"], "Healthy");
    assert!(row["Metadata"]["LastCheckTime"].is_string());
}

#[tokio::test]
async fn test_periodic_snapshot_loop_broadcasts() {
    let harness = harness().await;
    let source = SnapshotSource {
        inventory: std::sync::Arc::new(tokio::sync::RwLock::new(vec![http_service(
            "svc", "127.0.0.1", 80,
        )])),
        status: harness.engine.status().clone(),
    };

    let (controller, shutdown) = service_monitoring::shutdown::ShutdownController::new();
    let (_id, mut rx) = harness.hub.subscribe_dashboard();

    let hub = harness.hub.clone();
    tokio::spawn(hub.run_dashboard_loop(
        source,
        std::time::Duration::from_millis(50),
        shutdown,
    ));

    // At least two periodic frames arrive.
    for _ in 0..2 {
        let payload = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("periodic snapshot")
            .unwrap();
        let snapshot: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(snapshot.is_array());
    }

    // New subscribers immediately get the latest frame.
    let (_id2, mut late_rx) = harness.hub.subscribe_dashboard();
    let latest = harness.hub.last_dashboard_payload().await;
    assert!(latest.is_some(), "loop retains the last payload for reconnects");

    controller.trip();
    drop(late_rx);
}

#[tokio::test]
async fn test_slow_dashboard_subscriber_is_evicted() {
    let harness = harness().await;

    let (_slow, slow_rx) = harness.hub.subscribe_dashboard();
    let (_fast, mut fast_rx) = harness.hub.subscribe_dashboard();

    for _ in 0..SUBSCRIBER_BUFFER {
        harness.hub.publish_dashboard(b"frame".to_vec()).await;
        let _ = fast_rx.recv().await;
    }
    assert_eq!(harness.hub.dashboard_count(), 2);

    harness.hub.publish_dashboard(b"frame".to_vec()).await;
    assert_eq!(harness.hub.dashboard_count(), 1, "slow subscriber evicted");
    assert!(fast_rx.recv().await.is_some(), "healthy subscriber unaffected");

    drop(slow_rx);
}

#[tokio::test]
async fn test_management_updates_fan_out_to_dashboard() {
    let harness = harness().await;
    let (_id, mut rx) = harness.hub.subscribe_dashboard();

    let create = serde_json::json!({
        "type": "createGroup",
        "data": {"title": "Edge Routers", "deviceIds": ["a", "b"]}
    });
    harness
        .hub
        .handle_management_message(&serde_json::to_vec(&create).unwrap())
        .await;

    let broadcast: serde_json::Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(broadcast["type"], "groupCreated");
    assert_eq!(broadcast["data"]["title"], "Edge Routers");

    // New management clients receive the group in their initial payloads.
    let payloads = harness.hub.initial_management_payloads().await;
    let groups: serde_json::Value = serde_json::from_slice(&payloads[0]).unwrap();
    assert_eq!(groups["type"], "initialGroups");
    assert_eq!(groups["data"][0]["title"], "Edge Routers");
}
