//! End-to-end failure scenarios driven through the engine's check pipeline
//! against mocked targets.

use service_monitoring::model::HealthFlag;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn host_port(server: &MockServer) -> (String, u16) {
    let uri = url::Url::parse(&server.uri()).unwrap();
    (uri.host_str().unwrap().to_string(), uri.port().unwrap())
}

#[tokio::test]
async fn test_http_service_flaps_back() {
    let server = MockServer::start().await;

    // Four consecutive 500s.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(4)
        .mount(&server)
        .await;
    // Then recovery.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = harness().await;
    let (host, port) = host_port(&server);
    let def = http_service("api-prod", &host, port);

    let mut alert_rx = harness.engine.take_alert_receiver().unwrap();

    // Ticks 1-4: failure count climbs, alert fires exactly once (after 4).
    for expected in 1..=4u32 {
        harness.engine.check_service(&def).await;
        let status = harness.engine.status().get("api-prod").unwrap();
        assert_eq!(status.failure_count, expected);
    }

    let alert = alert_rx.try_recv().expect("alert after the fourth failure");
    assert_eq!(alert.service_name, "api-prod");
    assert!(alert_rx.try_recv().is_err(), "exactly one alert");

    // Tick 5: recovery resets everything.
    harness.engine.check_service(&def).await;
    let status = harness.engine.status().get("api-prod").unwrap();
    assert_eq!(status.failure_count, 0);
    assert_eq!(status.report.flag, HealthFlag::Healthy);
    assert!(status.last_service_up_time.is_some());
    assert!(harness.engine.status().last_alert("api-prod").is_none(), "alert cache cleared");

    // History has one row per tick.
    assert_eq!(harness.store.history().await.len(), 5);
}

#[tokio::test]
async fn test_failure_description_marks_plugin_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = harness().await;
    let (host, port) = host_port(&server);
    let def = http_service("api-prod", &host, port);

    harness.engine.check_service(&def).await;

    let status = harness.engine.status().get("api-prod").unwrap();
    assert!(status.report.description.contains("Plugin Failure Detected"));
    assert!(status.report.description.contains("500"));

    // The plugin's own result is recorded alongside the merged row.
    let plugin_rows = harness.store.plugin_results().await;
    assert_eq!(plugin_rows.len(), 1);
    assert_eq!(plugin_rows[0].plugin_id, "http_monitor");
}

#[tokio::test]
async fn test_snooze_suppresses_all_work() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = harness().await;
    let (host, port) = host_port(&server);
    let mut def = http_service("snoozed-svc", &host, port);
    def.snooze_until = Some(chrono::Utc::now() + chrono::Duration::minutes(10));

    for _ in 0..5 {
        harness.engine.check_service(&def).await;
    }

    assert!(harness.store.history().await.is_empty());
    assert!(harness.engine.status().get("snoozed-svc").is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), 0, "no probes issued");
}

#[tokio::test]
async fn test_snmp_v3_missing_credentials_never_alerts() {
    let harness = harness().await;
    let def = snmp_v3_service("core-switch");

    // Inventory-load validation marks the service misconfigured, so ticks
    // never open an SNMP session.
    harness.engine.initialize_service(&def).await;
    let mut alert_rx = harness.engine.take_alert_receiver().unwrap();

    for _ in 0..6 {
        harness.engine.check_service(&def).await;
    }

    let status = harness.engine.status().get("core-switch").unwrap();
    assert_eq!(status.report.flag, HealthFlag::InvalidConfiguration);
    assert!(status.failure_count > 3);

    assert!(alert_rx.try_recv().is_err(), "InvalidConfiguration never alerts");
    assert_eq!(harness.store.history().await.len(), 6, "but every tick is recorded");
}

#[tokio::test]
async fn test_alert_channel_full_retries_after_drain() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut settings = service_monitoring::config::EngineSettings::default();
    settings.alert_buffer_size = 1;
    settings.alert_throttle = chrono::Duration::zero();
    let harness = harness_with_settings(settings).await;

    let (host, port) = host_port(&server);
    let def = http_service("queued-svc", &host, port);
    let mut alert_rx = harness.engine.take_alert_receiver().unwrap();

    // Cross the threshold; the first emission fills the 1-slot channel.
    for _ in 0..4 {
        harness.engine.check_service(&def).await;
    }
    assert!(harness.engine.status().last_alert("queued-svc").is_some());

    // With a zero throttle the next tick tries again, finds the channel
    // full, and must leave the cache at its previous value.
    let before = harness.engine.status().last_alert("queued-svc").unwrap();
    harness.engine.check_service(&def).await;
    assert_eq!(harness.engine.status().last_alert("queued-svc").unwrap(), before);

    // Drain one slot; the retry then succeeds and the cache moves forward.
    let first = alert_rx.try_recv().unwrap();
    assert_eq!(first.service_name, "queued-svc");

    harness.engine.check_service(&def).await;
    let second = alert_rx.try_recv().expect("retry succeeds once a slot is free");
    assert_eq!(second.service_name, "queued-svc");
    assert!(harness.engine.status().last_alert("queued-svc").unwrap() > before);
}

#[tokio::test]
async fn test_acknowledged_service_stays_silent_but_visible() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = harness().await;
    let (host, port) = host_port(&server);
    let mut def = http_service("acked-svc", &host, port);
    def.is_acknowledged = true;

    let mut alert_rx = harness.engine.take_alert_receiver().unwrap();

    for _ in 0..6 {
        harness.engine.check_service(&def).await;
    }

    assert!(alert_rx.try_recv().is_err(), "acknowledged services never alert");
    assert_eq!(harness.store.history().await.len(), 6, "state keeps updating");
    assert_eq!(harness.engine.status().get("acked-svc").unwrap().failure_count, 6);
}
