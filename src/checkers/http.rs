//! HTTP endpoint plugin: issues a single configurable request and maps the
//! response class onto a health flag.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::model::{DeviceKind, HealthFlag, HealthReport, MonitoringResult, ServiceDefinition};
use crate::shutdown::Shutdown;

use super::{Checker, CheckerConfig};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpMonitorPlugin {
    client: reqwest::Client,
}

impl HttpMonitorPlugin {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    fn format_address(host: &str, port: u16) -> String {
        // Bracket bare IPv6 addresses.
        if host.matches(':').count() >= 2 && !host.contains('%') {
            format!("http://[{host}]:{port}")
        } else {
            format!("http://{host}:{port}")
        }
    }

    fn build_request(
        &self,
        service: &ServiceDefinition,
        url: &str,
    ) -> anyhow::Result<reqwest::RequestBuilder> {
        let method: reqwest::Method = service
            .config_str("method")
            .unwrap_or("GET")
            .to_uppercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid HTTP method: {e}"))?;

        let mut request = self.client.request(method.clone(), url);

        if let Some(timeout) = service.config_f64("timeout") {
            request = request.timeout(Duration::from_secs_f64(timeout.max(1.0)));
        }

        if let Some(token) = service.config_str("auth_token") {
            request = request.bearer_auth(token);
        }

        if let Some(headers) = service.configuration.get("headers").and_then(|v| v.as_object()) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }

        if let Some(body) = service.config_str("post_data") {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        Ok(request)
    }
}

impl Default for HttpMonitorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Checker for HttpMonitorPlugin {
    fn name(&self) -> &'static str {
        "http_monitor"
    }

    fn description(&self) -> &'static str {
        "HTTP service monitor"
    }

    fn supported_devices(&self) -> &'static [DeviceKind] {
        &[DeviceKind::WebModule, DeviceKind::Server]
    }

    async fn initialize(&self, configuration: &CheckerConfig) -> anyhow::Result<()> {
        if let Some(method) = configuration.get("method").and_then(|v| v.as_str()) {
            method
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(|e| anyhow::anyhow!("invalid HTTP method {method:?}: {e}"))?;
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

        let url = Self::format_address(&service.host, service.port);
        let request = match self.build_request(service, &url) {
            Ok(request) => request,
            Err(e) => {
                result.report = HealthReport::new(HealthFlag::InvalidConfiguration, e.to_string());
                return Ok(result);
            }
        };

        let response = tokio::select! {
            response = request.send() => response,
            _ = shutdown.cancelled() => {
                result.report = HealthReport::new(HealthFlag::Degraded, "check aborted");
                return Ok(result);
            }
        };

        result.report = match response {
            Ok(response) => {
                let status = response.status().as_u16();
                trace!(status, "HTTP response received");

                if (200..300).contains(&status) {
                    HealthReport::healthy()
                } else if (300..500).contains(&status) {
                    HealthReport::new(HealthFlag::Escalation, format!("service returned status {status}"))
                } else {
                    HealthReport::new(HealthFlag::Degraded, format!("service returned status {status}"))
                }
            }
            Err(e) => HealthReport::new(HealthFlag::Degraded, format!("HTTP request failed: {e}")),
        };

        Ok(result)
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
