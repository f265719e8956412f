//! Server resource plugin: scans recently stored agent samples against the
//! agent's configured thresholds. A sustained run of samples above the high
//! threshold degrades the service.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::checkers::agent::AgentClient;
use crate::model::{DeviceKind, HealthFlag, HealthReport, MonitoringResult, ServiceDefinition};
use crate::shutdown::Shutdown;
use crate::storage::schema::AgentMetricRow;
use crate::storage::MonitorStore;

use super::{Checker, CheckerConfig};

/// How many recent samples the scan considers.
const SCAN_WINDOW: usize = 60;

/// Consecutive samples above threshold required to flag a breach.
const SEQUENCE_LENGTH: usize = 5;

const FALLBACK_HIGH_THRESHOLD: f64 = 80.0;

pub struct ServerResourcePlugin {
    client: AgentClient,
    store: Arc<dyn MonitorStore>,
}

impl ServerResourcePlugin {
    pub fn new(store: Arc<dyn MonitorStore>) -> Self {
        Self {
            client: AgentClient::new(),
            store,
        }
    }

    /// True when any `sequence_length` consecutive values all exceed
    /// `threshold`.
    pub fn has_breach_sequence(values: &[f64], threshold: f64, sequence_length: usize) -> bool {
        if sequence_length == 0 || values.len() < sequence_length {
            return false;
        }

        values
            .windows(sequence_length)
            .any(|window| window.iter().all(|v| *v > threshold))
    }

    async fn thresholds(&self, service: &ServiceDefinition) -> (f64, f64) {
        let Some(base_url) = service.agent_api_base_url.as_deref() else {
            return (FALLBACK_HIGH_THRESHOLD, FALLBACK_HIGH_THRESHOLD);
        };

        match self.client.fetch_thresholds(base_url).await {
            Ok(response) => {
                let cpu = response.config.metrics_threshold.cpu.high as f64;
                let disk = response.config.metrics_threshold.disk.high as f64;
                (cpu, disk)
            }
            Err(e) => {
                warn!(service = %service.name, "threshold fetch failed, using fallback: {e:?}");
                (FALLBACK_HIGH_THRESHOLD, FALLBACK_HIGH_THRESHOLD)
            }
        }
    }

    fn scan(samples: &[AgentMetricRow], cpu_threshold: f64) -> HealthReport {
        if samples.is_empty() {
            return HealthReport::new(
                HealthFlag::Unknown,
                "no stored agent samples to evaluate",
            );
        }

        // Samples arrive newest first; scan chronologically.
        let mut cpu: Vec<f64> = samples.iter().map(|s| s.cpu_usage).collect();
        cpu.reverse();
        let mut memory: Vec<f64> = samples.iter().map(|s| s.memory_usage).collect();
        memory.reverse();

        if Self::has_breach_sequence(&cpu, cpu_threshold, SEQUENCE_LENGTH) {
            return HealthReport::new(
                HealthFlag::Degraded,
                format!("CPU above {cpu_threshold}% for {SEQUENCE_LENGTH} consecutive samples"),
            );
        }

        if Self::has_breach_sequence(&memory, cpu_threshold, SEQUENCE_LENGTH) {
            return HealthReport::new(
                HealthFlag::Degraded,
                format!("memory above {cpu_threshold}% for {SEQUENCE_LENGTH} consecutive samples"),
            );
        }

        HealthReport::healthy()
    }
}

#[async_trait]
impl Checker for ServerResourcePlugin {
    fn name(&self) -> &'static str {
        "server_resources"
    }

    fn description(&self) -> &'static str {
        "Threshold scan over stored server resource metrics"
    }

    fn supported_devices(&self) -> &'static [DeviceKind] {
        &[DeviceKind::Server, DeviceKind::Agent]
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

        if shutdown.is_cancelled() {
            result.report = HealthReport::new(HealthFlag::Degraded, "check aborted");
            return Ok(result);
        }

        let samples = match self
            .store
            .query_agent_metrics(&service.system_monitor_id.to_string(), SCAN_WINDOW)
            .await
        {
            Ok(samples) => samples,
            Err(e) => {
                result.report =
                    HealthReport::new(HealthFlag::Degraded, format!("metric query failed: {e}"));
                return Ok(result);
            }
        };

        let (cpu_threshold, _disk_threshold) = self.thresholds(service).await;
        debug!(samples = samples.len(), cpu_threshold, "scanning stored samples");

        result.report = Self::scan(&samples, cpu_threshold);
        Ok(result)
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
