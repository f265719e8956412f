//! Scheduling exclusivity and engine lifecycle under concurrency.

use std::sync::Arc;

use service_monitoring::storage::schema::ServiceRow;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_same_service_ticks_never_overlap() {
    let server = MockServer::start().await;
    // Slow responses keep the first tick in flight while others arrive.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(500)))
        .mount(&server)
        .await;

    let harness = harness().await;
    let uri = url::Url::parse(&server.uri()).unwrap();
    let def = Arc::new(http_service(
        "exclusive-svc",
        uri.host_str().unwrap(),
        uri.port().unwrap(),
    ));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let engine = harness.engine.clone();
        let def = def.clone();
        tasks.push(tokio::spawn(async move {
            engine.check_service(&def).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Exactly one tick survived the run guard; the rest were skipped.
    assert_eq!(harness.store.history().await.len(), 1);
}

#[tokio::test]
async fn test_distinct_services_run_concurrently() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(300)))
        .mount(&server)
        .await;

    let harness = harness().await;
    let uri = url::Url::parse(&server.uri()).unwrap();
    let host = uri.host_str().unwrap().to_string();
    let port = uri.port().unwrap();

    let started = std::time::Instant::now();
    let mut tasks = Vec::new();
    for i in 0..4 {
        let engine = harness.engine.clone();
        let def = http_service(&format!("svc-{i}"), &host, port);
        tasks.push(tokio::spawn(async move {
            engine.check_service(&def).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(harness.store.history().await.len(), 4, "all services ticked");
    assert!(
        started.elapsed() < std::time::Duration::from_millis(1100),
        "ticks across services run in parallel, not back to back"
    );
}

#[tokio::test]
async fn test_engine_start_and_graceful_stop() {
    let harness = harness().await;

    // Seed one stored service so start has an inventory to schedule.
    harness
        .store
        .seed_services(vec![ServiceRow {
            system_monitor_id: uuid::Uuid::new_v4().to_string(),
            name: "scheduled-svc".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
            is_monitored: true,
            current_health_check: "Unknown".to_string(),
            device: "WebModule".to_string(),
            failure_count: 0,
            retry_count: 0,
            configuration_json: r#"{"timeout": 1}"#.to_string(),
            check_interval: "*/5 * * * *".to_string(),
            is_acknowledged: false,
            snooze_until: None,
            plugins_json: r#"["http_monitor"]"#.to_string(),
            agent_api_base_url: None,
        }])
        .await;

    harness.engine.start().await.unwrap();

    // Stop must complete well inside the graceful ceiling when idle.
    tokio::time::timeout(std::time::Duration::from_secs(20), harness.engine.stop())
        .await
        .expect("stop should finish inside the ceiling");
}

#[tokio::test]
async fn test_start_fails_when_both_inventory_sources_fail() {
    let harness = harness().await;
    harness.store.fail_service_load(true).await;

    assert!(harness.engine.start().await.is_err());
}
