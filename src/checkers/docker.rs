//! Docker plugin: container stats pulled through the host agent's container
//! endpoint.

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::checkers::agent::AgentClient;
use crate::model::{DeviceKind, HealthFlag, HealthReport, MonitoringResult, ServiceDefinition};
use crate::shutdown::Shutdown;

use super::{Checker, CheckerConfig};

pub struct DockerMonitorPlugin {
    client: AgentClient,
}

impl DockerMonitorPlugin {
    pub fn new() -> Self {
        Self {
            client: AgentClient::new(),
        }
    }

    fn classify(stats: &serde_json::Value) -> HealthReport {
        // The agent reports one entry per container; anything flagged as
        // exited or dead degrades the service.
        let containers = stats
            .get("containers")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let unhealthy: Vec<String> = containers
            .iter()
            .filter(|c| {
                matches!(
                    c.get("state").and_then(|s| s.as_str()),
                    Some("exited") | Some("dead")
                )
            })
            .filter_map(|c| c.get("name").and_then(|n| n.as_str()).map(String::from))
            .collect();

        if unhealthy.is_empty() {
            HealthReport::healthy()
        } else {
            HealthReport::new(
                HealthFlag::Escalation,
                format!("containers not running: {}", unhealthy.join(", ")),
            )
        }
    }
}

impl Default for DockerMonitorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Checker for DockerMonitorPlugin {
    fn name(&self) -> &'static str {
        "docker_monitor"
    }

    fn description(&self) -> &'static str {
        "Container stats via the host agent"
    }

    fn supported_devices(&self) -> &'static [DeviceKind] {
        &[DeviceKind::Docker]
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

        let stats = tokio::select! {
            stats = self.client.fetch_container_stats(base_url) => stats,
            _ = shutdown.cancelled() => {
                result.report = HealthReport::new(HealthFlag::Degraded, "check aborted");
                return Ok(result);
            }
        };

        result.report = match stats {
            Ok(stats) => {
                debug!("container stats received");
                Self::classify(&stats)
            }
            Err(e) => e.into_report(),
        };

        Ok(result)
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
