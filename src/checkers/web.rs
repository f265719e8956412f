//! Web-module ping plugin: probes a web module's ping path and requires an
//! HTTP 200 answer. Anything else, including a reachable-but-failing
//! module, fails the check.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::model::{DeviceKind, HealthFlag, HealthReport, MonitoringResult, ServiceDefinition};
use crate::shutdown::Shutdown;

use super::{Checker, CheckerConfig};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebModulePlugin {
    client: reqwest::Client,
}

impl WebModulePlugin {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .danger_accept_invalid_certs(true)
                .build()
                .expect("failed to build web module HTTP client"),
        }
    }

    fn url(service: &ServiceDefinition) -> String {
        let scheme = service.config_str("scheme").unwrap_or("http");
        let path = service.config_str("ping_path").unwrap_or("/");
        format!("{scheme}://{}:{}{path}", service.host, service.port)
    }
}

impl Default for WebModulePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Checker for WebModulePlugin {
    fn name(&self) -> &'static str {
        "web_module"
    }

    fn description(&self) -> &'static str {
        "Web module availability ping"
    }

    fn supported_devices(&self) -> &'static [DeviceKind] {
        &[DeviceKind::WebModule]
    }

    async fn initialize(&self, configuration: &CheckerConfig) -> anyhow::Result<()> {
        if let Some(scheme) = configuration.get("scheme").and_then(|v| v.as_str()) {
            if !matches!(scheme, "http" | "https") {
                anyhow::bail!("unsupported scheme {scheme:?}");
            }
        }
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

        if service.host.is_empty() {
            result.report = HealthReport::new(HealthFlag::InvalidConfiguration, "host cannot be empty");
            return Ok(result);
        }

        let url = Self::url(service);

        let response = tokio::select! {
            response = self.client.get(&url).send() => response,
            _ = shutdown.cancelled() => {
                result.report = HealthReport::new(HealthFlag::Degraded, "check aborted");
                return Ok(result);
            }
        };

        result.report = match response {
            Ok(response) => {
                let status = response.status().as_u16();
                trace!(status, "web module answered");

                if status == 200 {
                    HealthReport::healthy()
                } else {
                    HealthReport::new(
                        HealthFlag::Escalation,
                        format!("web module ping returned status {status}"),
                    )
                }
            }
            Err(e) if e.is_timeout() => {
                HealthReport::new(HealthFlag::Degraded, format!("web module ping timed out: {e}"))
            }
            Err(e) => HealthReport::new(HealthFlag::Escalation, format!("web module unreachable: {e}")),
        };

        Ok(result)
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
