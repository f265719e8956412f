//! Shared builders for integration tests: an engine wired against the
//! in-memory store with recording notification transports.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use service_monitoring::broadcast::Hub;
use service_monitoring::checkers::PluginRegistry;
use service_monitoring::config::EngineSettings;
use service_monitoring::model::{DeviceKind, ServiceDefinition};
use service_monitoring::notify::config::{
    EmailPlatformConfig, NotificationConfigManager, SecretOverrides, SlackPlatformConfig,
};
use service_monitoring::notify::email::EmailTransport;
use service_monitoring::notify::slack::SlackTransport;
use service_monitoring::notify::Dispatcher;
use service_monitoring::storage::schema::RecipientRow;
use service_monitoring::storage::MemoryStore;
use service_monitoring::Engine;
use uuid::Uuid;

/// Email transport that records batches instead of talking SMTP.
#[derive(Default)]
pub struct RecordingEmail {
    pub batches: Mutex<Vec<(Vec<String>, String, String)>>,
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send_batch(
        &self,
        _config: &EmailPlatformConfig,
        recipients: &[String],
        subject: &str,
        body_html: String,
    ) -> anyhow::Result<()> {
        self.batches
            .lock()
            .unwrap()
            .push((recipients.to_vec(), subject.to_string(), body_html));
        Ok(())
    }
}

/// Slack transport that records per-recipient sends.
#[derive(Default)]
pub struct RecordingSlack {
    pub sent: Mutex<Vec<String>>,
}

#[async_trait]
impl SlackTransport for RecordingSlack {
    async fn send_direct(
        &self,
        _config: &SlackPlatformConfig,
        slack_id: &str,
        _payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(slack_id.to_string());
        Ok(())
    }
}

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub hub: Arc<Hub>,
    pub engine: Arc<Engine>,
    pub dispatcher: Arc<Dispatcher>,
    pub email: Arc<RecordingEmail>,
    pub slack: Arc<RecordingSlack>,
}

/// Engine against the in-memory store with the full builtin plugin family
/// and recording transports. `settings` lets scenarios shrink the alert
/// buffer or thresholds.
pub async fn harness_with_settings(settings: EngineSettings) -> TestHarness {
    let store = Arc::new(MemoryStore::new());
    seed_platforms(&store).await;

    let hub = Arc::new(Hub::new());
    let configs = Arc::new(NotificationConfigManager::new(
        store.clone(),
        SecretOverrides::default(),
    ));
    let email = Arc::new(RecordingEmail::default());
    let slack = Arc::new(RecordingSlack::default());
    let dispatcher = Arc::new(Dispatcher::with_transports(
        configs,
        hub.clone(),
        email.clone(),
        slack.clone(),
    ));

    let registry = PluginRegistry::builtin(store.clone());
    let engine = Engine::new(
        store.clone(),
        registry,
        dispatcher.clone(),
        hub.clone(),
        settings,
        "services.json".to_string(),
    );

    TestHarness {
        store,
        hub,
        engine,
        dispatcher,
        email,
        slack,
    }
}

pub async fn harness() -> TestHarness {
    harness_with_settings(EngineSettings::default()).await
}

async fn seed_platforms(store: &MemoryStore) {
    store
        .seed_platforms(vec![
            (
                "Email".to_string(),
                serde_json::json!({
                    "enabled": true,
                    "smtp_server": "smtp.example.test",
                    "smtp_port": 587,
                    "from_address": "monitor@example.test"
                })
                .to_string(),
            ),
            (
                "Slack".to_string(),
                serde_json::json!({
                    "enabled": true,
                    "webhook_url": "https://hooks.slack.example.test/T0/B0"
                })
                .to_string(),
            ),
        ])
        .await;
}

/// A WebModule service pointed at `host:port` running the HTTP plugin every
/// minute, matching the flapping-service scenario.
pub fn http_service(name: &str, host: &str, port: u16) -> ServiceDefinition {
    ServiceDefinition {
        system_monitor_id: Uuid::new_v4(),
        name: name.to_string(),
        host: host.to_string(),
        port,
        device: DeviceKind::WebModule,
        is_monitored: true,
        is_acknowledged: false,
        snooze_until: None,
        check_interval: "* * * * *".to_string(),
        plugins: vec!["http_monitor".to_string()],
        agent_api_base_url: None,
        configuration: serde_json::json!({"timeout": 2})
            .as_object()
            .unwrap()
            .clone(),
    }
}

pub fn snmp_v3_service(name: &str) -> ServiceDefinition {
    ServiceDefinition {
        system_monitor_id: Uuid::new_v4(),
        name: name.to_string(),
        host: "192.0.2.50".to_string(),
        port: 161,
        device: DeviceKind::Network,
        is_monitored: true,
        is_acknowledged: false,
        snooze_until: None,
        check_interval: "*/5 * * * *".to_string(),
        plugins: vec!["network_snmp".to_string()],
        agent_api_base_url: None,
        configuration: serde_json::json!({"snmpVersion": "v3"})
            .as_object()
            .unwrap()
            .clone(),
    }
}

pub async fn seed_recipients_for(store: &MemoryStore, def: &ServiceDefinition) {
    store
        .seed_recipients(vec![
            RecipientRow {
                system_monitor_id: def.system_monitor_id,
                service_name: def.name.clone(),
                user_name: "alice".to_string(),
                email: "alice@example.test".to_string(),
                phone_number: String::new(),
                slack_id: "Ualice".to_string(),
                group_name: "ops".to_string(),
                platform: "Email".to_string(),
            },
            RecipientRow {
                system_monitor_id: def.system_monitor_id,
                service_name: def.name.clone(),
                user_name: "bob".to_string(),
                email: "bob@example.test".to_string(),
                phone_number: String::new(),
                slack_id: "Ubob".to_string(),
                group_name: "ops".to_string(),
                platform: "Slack".to_string(),
            },
        ])
        .await;
}
