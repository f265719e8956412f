//! Agent metrics plugin: pulls health, threshold configuration, and resource
//! usage from a host agent, persists the samples, and acknowledges the sync.
//!
//! All agent calls disable certificate verification; trust to agents is
//! established out-of-band.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::model::{DeviceKind, HealthFlag, HealthReport, MonitoringResult, ServiceDefinition};
use crate::shutdown::Shutdown;
use crate::storage::schema::{AgentDiskRow, AgentMetricRow};
use crate::storage::MonitorStore;

use super::{Checker, CheckerConfig};

const AGENT_TIMEOUT: Duration = Duration::from_secs(30);

pub const HEALTH_ENDPOINT: &str = "/api/v1/agent/health";
pub const CONFIG_ENDPOINT: &str = "/api/v1/agent/config";
pub const RESOURCE_USAGE_ENDPOINT: &str = "/api/v1/agent/resource-usage";
pub const SYNC_COMPLETE_ENDPOINT: &str = "/api/v1/agent/sync_complete";
pub const CONTAINER_ENDPOINT: &str = "/api/v1/agent/container";

/// Complete metrics payload returned by the agent health endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentMetricResponse {
    #[serde(default)]
    pub status: String,
    #[serde(rename = "systemInfo")]
    pub system_info: AgentSystemInfo,
    #[serde(default)]
    pub uptime: String,
    #[serde(rename = "agent_info")]
    pub agent_info: AgentInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentInfo {
    #[serde(default)]
    pub version: String,
    pub agent_id: String,
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub os: String,
    #[serde(rename = "SDKVersion", default)]
    pub sdk_version: String,
}

/// CPU and memory series are `[timestamp_millis, usage]` pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSystemInfo {
    #[serde(default)]
    pub cpu: Vec<Vec<f64>>,
    #[serde(default)]
    pub memory: Vec<Vec<f64>>,
    #[serde(default)]
    pub disk: Vec<AgentDiskMetric>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentDiskMetric {
    pub drive: String,
    pub size: i64,
    pub free: i64,
    pub used: i64,
}

/// Threshold and enabled-metrics configuration served by the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentThresholdResponse {
    pub config: AgentThresholdConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentThresholdConfig {
    #[serde(rename = "AgentID", default)]
    pub agent_id: String,
    #[serde(rename = "Metrics", default)]
    pub metrics: EnabledMetrics,
    #[serde(rename = "MetricsThreshold", default)]
    pub metrics_threshold: MetricsThreshold,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnabledMetrics {
    #[serde(rename = "CPU", default)]
    pub cpu: bool,
    #[serde(rename = "Disk", default)]
    pub disk: bool,
    #[serde(rename = "Memory", default)]
    pub memory: bool,
    #[serde(rename = "Latency", default)]
    pub latency: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsThreshold {
    #[serde(rename = "CPU", default)]
    pub cpu: ThresholdBand,
    #[serde(rename = "Disk", default)]
    pub disk: ThresholdBand,
    #[serde(rename = "Latency", default)]
    pub latency: ThresholdBand,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdBand {
    #[serde(default = "ThresholdBand::default_high")]
    pub high: i64,
    #[serde(default)]
    pub mid: i64,
    #[serde(default)]
    pub low: i64,
}

impl ThresholdBand {
    fn default_high() -> i64 {
        80
    }
}

impl Default for ThresholdBand {
    fn default() -> Self {
        Self { high: 80, mid: 0, low: 0 }
    }
}

/// One process entry from the resource-usage endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessResourceUsage {
    #[serde(default)]
    pub username: String,
    pub pid: i64,
    pub cpu_percent: f64,
    #[serde(default)]
    pub status: String,
    pub memory_percent: f64,
    pub name: String,
}

/// Stateless handle to the agent HTTP API. Cloned freely; carries no
/// back-reference to any service.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: reqwest::Client,
}

impl AgentClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(AGENT_TIMEOUT)
                .danger_accept_invalid_certs(true)
                .build()
                .expect("failed to build agent HTTP client"),
        }
    }

    /// Validate and join the base URL with an endpoint path.
    pub fn endpoint(base_url: &str, endpoint: &str) -> anyhow::Result<String> {
        let base: reqwest::Url = base_url
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid agent base URL {base_url:?}: {e}"))?;
        let joined = base
            .join(endpoint)
            .map_err(|e| anyhow::anyhow!("invalid agent endpoint {endpoint:?}: {e}"))?;
        Ok(joined.to_string())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AgentCallError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentCallError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentCallError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| AgentCallError::Parse(e.to_string()))
    }

    pub async fn fetch_health(&self, base_url: &str) -> Result<AgentMetricResponse, AgentCallError> {
        let url = Self::endpoint(base_url, HEALTH_ENDPOINT).map_err(AgentCallError::config)?;
        self.get_json(&url).await
    }

    pub async fn fetch_thresholds(&self, base_url: &str) -> Result<AgentThresholdResponse, AgentCallError> {
        let url = Self::endpoint(base_url, CONFIG_ENDPOINT).map_err(AgentCallError::config)?;
        self.get_json(&url).await
    }

    pub async fn fetch_resource_usage(
        &self,
        base_url: &str,
        limit: usize,
    ) -> Result<Vec<ProcessResourceUsage>, AgentCallError> {
        let url = Self::endpoint(base_url, RESOURCE_USAGE_ENDPOINT).map_err(AgentCallError::config)?;
        self.get_json(&format!("{url}?limit={limit}")).await
    }

    pub async fn fetch_container_stats(&self, base_url: &str) -> Result<serde_json::Value, AgentCallError> {
        let url = Self::endpoint(base_url, CONTAINER_ENDPOINT).map_err(AgentCallError::config)?;
        self.get_json(&url).await
    }

    /// Final GET acknowledging a completed metrics sync.
    pub async fn notify_sync_complete(&self, base_url: &str) -> Result<(), AgentCallError> {
        let url = Self::endpoint(base_url, SYNC_COMPLETE_ENDPOINT).map_err(AgentCallError::config)?;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentCallError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AgentCallError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Failure classes of one agent call; each maps to a specific health flag.
#[derive(Debug)]
pub enum AgentCallError {
    Config(String),
    Connection(String),
    Status(u16),
    Parse(String),
}

impl AgentCallError {
    fn config(e: anyhow::Error) -> Self {
        AgentCallError::Config(e.to_string())
    }

    pub fn into_report(self) -> HealthReport {
        match self {
            AgentCallError::Config(msg) => HealthReport::new(HealthFlag::InvalidConfiguration, msg),
            AgentCallError::Connection(msg) => {
                HealthReport::new(HealthFlag::Degraded, format!("agent unreachable: {msg}"))
            }
            AgentCallError::Status(code) => HealthReport::new(
                HealthFlag::Escalation,
                format!("unsuccessful agent call: status {code}"),
            ),
            AgentCallError::Parse(msg) => HealthReport::new(
                HealthFlag::Escalation,
                format!("unable to sync agent metrics, failed to decode response: {msg}"),
            ),
        }
    }
}

pub struct AgentMonitorPlugin {
    client: AgentClient,
    store: std::sync::Arc<dyn MonitorStore>,
}

impl AgentMonitorPlugin {
    pub fn new(store: std::sync::Arc<dyn MonitorStore>) -> Self {
        Self {
            client: AgentClient::new(),
            store,
        }
    }

    fn metric_rows(
        service: &ServiceDefinition,
        response: &AgentMetricResponse,
    ) -> (Vec<AgentMetricRow>, Vec<AgentDiskRow>) {
        let agent_id = &response.agent_info.agent_id;
        let now = Utc::now();

        let samples = response
            .system_info
            .cpu
            .iter()
            .zip(response.system_info.memory.iter())
            .filter_map(|(cpu, memory)| {
                let (ts, cpu_usage) = (*cpu.first()?, *cpu.get(1)?);
                let memory_usage = *memory.get(1)?;
                Some(AgentMetricRow {
                    agent_id: agent_id.clone(),
                    system_monitor_id: service.system_monitor_id,
                    sampled_at: DateTime::from_timestamp_millis(ts as i64).unwrap_or(now),
                    cpu_usage,
                    memory_usage,
                })
            })
            .collect();

        let disks = response
            .system_info
            .disk
            .iter()
            .map(|disk| AgentDiskRow {
                agent_id: agent_id.clone(),
                drive: disk.drive.clone(),
                size_bytes: disk.size,
                free_bytes: disk.free,
                used_bytes: disk.used,
                updated_at: now,
            })
            .collect();

        (samples, disks)
    }

    async fn sync(&self, service: &ServiceDefinition, base_url: &str) -> Result<usize, HealthReport> {
        let health = self
            .client
            .fetch_health(base_url)
            .await
            .map_err(AgentCallError::into_report)?;

        let (samples, disks) = Self::metric_rows(service, &health);
        let sample_count = samples.len();

        self.store
            .upsert_agent_metrics(&samples)
            .await
            .map_err(|e| HealthReport::new(HealthFlag::Escalation, format!("unable to sync agent metrics: {e}")))?;
        self.store
            .upsert_agent_disks(&disks)
            .await
            .map_err(|e| HealthReport::new(HealthFlag::Escalation, format!("unable to sync agent disks: {e}")))?;

        // Threshold configuration is advisory for the server-resource scan;
        // a failure here degrades the sync but keeps the samples.
        if let Err(e) = self.client.fetch_thresholds(base_url).await {
            warn!(service = %service.name, "agent threshold fetch failed: {:?}", e);
        }

        if let Err(e) = self.client.fetch_resource_usage(base_url, 10).await {
            warn!(service = %service.name, "agent resource-usage fetch failed: {:?}", e);
        }

        self.client
            .notify_sync_complete(base_url)
            .await
            .map_err(AgentCallError::into_report)?;

        Ok(sample_count)
    }
}

#[async_trait]
impl Checker for AgentMonitorPlugin {
    fn name(&self) -> &'static str {
        "agent_monitor"
    }

    fn description(&self) -> &'static str {
        "Agent metrics synchronization"
    }

    fn supported_devices(&self) -> &'static [DeviceKind] {
        &[DeviceKind::Agent, DeviceKind::Server, DeviceKind::Docker]
    }

    async fn initialize(&self, _configuration: &CheckerConfig) -> anyhow::Result<()> {
        Ok(())
    }

    #[instrument(skip(self, shutdown, service), fields(service = %service.name))]
    async fn check(
        &self,
        shutdown: &Shutdown,
        service: &ServiceDefinition,
    ) -> anyhow::Result<MonitoringResult> {
        let mut result = MonitoringResult::new(
            service.system_monitor_id,
            self.name(),
            HealthReport::new(HealthFlag::Unknown, ""),
        );

        let Some(base_url) = service.agent_api_base_url.as_deref() else {
            result.report = HealthReport::new(
                HealthFlag::InvalidConfiguration,
                "agent API base URL is required for this device",
            );
            return Ok(result);
        };

        tokio::select! {
            sync = self.sync(service, base_url) => {
                result.report = match sync {
                    Ok(samples) => {
                        debug!(samples, "agent metrics synchronized");
                        HealthReport::healthy()
                    }
                    Err(report) => report,
                };
            }
            _ = shutdown.cancelled() => {
                result.report = HealthReport::new(HealthFlag::Degraded, "check aborted");
            }
        }

        Ok(result)
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownController;
    use crate::storage::MemoryStore;
    use std::sync::Arc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn definition(base_url: Option<String>) -> ServiceDefinition {
        ServiceDefinition {
            system_monitor_id: Uuid::new_v4(),
            name: "host-01".to_string(),
            host: "10.0.0.5".to_string(),
            port: 9200,
            device: DeviceKind::Agent,
            is_monitored: true,
            is_acknowledged: false,
            snooze_until: None,
            check_interval: String::new(),
            plugins: vec!["agent_monitor".to_string()],
            agent_api_base_url: base_url,
            configuration: serde_json::Map::new(),
        }
    }

    fn health_body() -> serde_json::Value {
        serde_json::json!({
            "status": "ok",
            "uptime": "4 days",
            "systemInfo": {
                "cpu": [[1700000000000.0, 42.5], [1700000060000.0, 43.1]],
                "memory": [[1700000000000.0, 61.0], [1700000060000.0, 62.2]],
                "disk": [{"drive": "/dev/sda1", "size": 1000, "free": 400, "used": 600}]
            },
            "agent_info": {
                "agent_id": "agent-7",
                "name": "host-01",
                "os": "linux"
            }
        })
    }

    async fn mount_agent(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path(HEALTH_ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(CONFIG_ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "config": {"AgentID": "agent-7", "MetricsThreshold": {"CPU": {"high": 85}}}
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(RESOURCE_USAGE_ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"username": "root", "pid": 1, "cpu_percent": 1.0, "memory_percent": 0.5, "name": "init"}
            ])))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(SYNC_COMPLETE_ENDPOINT))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_successful_sync_is_healthy_and_persists() {
        let server = MockServer::start().await;
        mount_agent(&server).await;

        let store = Arc::new(MemoryStore::new());
        let plugin = AgentMonitorPlugin::new(store.clone());
        let (_c, shutdown) = ShutdownController::new();
        let def = definition(Some(server.uri()));

        let result = plugin.check(&shutdown, &def).await.unwrap();
        assert_eq!(result.report.flag, HealthFlag::Healthy);

        let stored = store
            .query_agent_metrics(&def.system_monitor_id.to_string(), 10)
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(store.agent_disk("agent-7", "/dev/sda1").await.is_some());
    }

    #[tokio::test]
    async fn test_missing_base_url_is_invalid_configuration() {
        let store = Arc::new(MemoryStore::new());
        let plugin = AgentMonitorPlugin::new(store);
        let (_c, shutdown) = ShutdownController::new();

        let result = plugin.check(&shutdown, &definition(None)).await.unwrap();
        assert_eq!(result.report.flag, HealthFlag::InvalidConfiguration);
    }

    #[tokio::test]
    async fn test_unreachable_agent_degrades() {
        let store = Arc::new(MemoryStore::new());
        let plugin = AgentMonitorPlugin::new(store);
        let (_c, shutdown) = ShutdownController::new();

        let result = plugin
            .check(&shutdown, &definition(Some("http://127.0.0.1:1".to_string())))
            .await
            .unwrap();
        assert_eq!(result.report.flag, HealthFlag::Degraded);
    }

    #[tokio::test]
    async fn test_malformed_health_payload_escalates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let plugin = AgentMonitorPlugin::new(store);
        let (_c, shutdown) = ShutdownController::new();

        let result = plugin
            .check(&shutdown, &definition(Some(server.uri())))
            .await
            .unwrap();
        assert_eq!(result.report.flag, HealthFlag::Escalation);
    }

    #[tokio::test]
    async fn test_agent_5xx_escalates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_ENDPOINT))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let plugin = AgentMonitorPlugin::new(store);
        let (_c, shutdown) = ShutdownController::new();

        let result = plugin
            .check(&shutdown, &definition(Some(server.uri())))
            .await
            .unwrap();
        assert_eq!(result.report.flag, HealthFlag::Escalation);
    }
}
