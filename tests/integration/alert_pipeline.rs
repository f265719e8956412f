//! Alert channel → processor → recipient resolution → platform fan-out,
//! wired end to end with recording transports.

use service_monitoring::alerts::AlertProcessor;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_threshold_crossing_reaches_recipients_and_notifier_topic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = harness().await;
    let uri = url::Url::parse(&server.uri()).unwrap();
    let def = http_service("api-prod", uri.host_str().unwrap(), uri.port().unwrap());
    seed_recipients_for(&harness.store, &def).await;

    // Run the processor exactly as the engine would.
    let alert_rx = harness.engine.take_alert_receiver().unwrap();
    let processor_handle =
        AlertProcessor::new(harness.store.clone(), harness.dispatcher.clone()).spawn(alert_rx);

    let (_id, mut notifier_rx) = harness.hub.subscribe_notifier();

    for _ in 0..4 {
        harness.engine.check_service(&def).await;
    }

    // The notifier topic sees the event.
    let payload = tokio::time::timeout(std::time::Duration::from_secs(2), notifier_rx.recv())
        .await
        .expect("notifier delivery")
        .unwrap();
    let event: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(event["service_name"], "api-prod");
    assert_eq!(event["severity"], "critical");

    // Give fan-out a moment to finish, then inspect the transports.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let batches = harness.email.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 1, "one envelope for the email batch");
    assert_eq!(batches[0].0, vec!["alice@example.test"]);
    assert!(batches[0].1.contains("api-prod"), "subject names the service");
    assert!(batches[0].2.contains("Hello alice"));

    let slack_sent = harness.slack.sent.lock().unwrap().clone();
    assert_eq!(slack_sent, vec!["Ubob"], "one post per slack recipient");

    processor_handle.abort();
}

#[tokio::test]
async fn test_event_without_recipients_still_broadcasts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let harness = harness().await;
    let uri = url::Url::parse(&server.uri()).unwrap();
    let def = http_service("lonely-svc", uri.host_str().unwrap(), uri.port().unwrap());

    let alert_rx = harness.engine.take_alert_receiver().unwrap();
    let processor_handle =
        AlertProcessor::new(harness.store.clone(), harness.dispatcher.clone()).spawn(alert_rx);

    let (_id, mut notifier_rx) = harness.hub.subscribe_notifier();

    for _ in 0..4 {
        harness.engine.check_service(&def).await;
    }

    let payload = tokio::time::timeout(std::time::Duration::from_secs(2), notifier_rx.recv())
        .await
        .expect("notifier delivery without recipients")
        .unwrap();
    let event: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(event["service_name"], "lonely-svc");

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(harness.email.batches.lock().unwrap().is_empty());
    assert!(harness.slack.sent.lock().unwrap().is_empty());

    processor_handle.abort();
}
