//! Default health probe: TCP reachability plus an optional protocol-aware
//! sub-probe for well-known ports. Always runs before any plugin.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::model::{DeviceKind, HealthFlag, HealthReport, MonitoringResult, ServiceDefinition};
use crate::shutdown::Shutdown;

use super::{Checker, CheckerConfig};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimal TDS pre-login packet; SQL Server answers with a 0x04 leading byte.
const TDS_PRELOGIN: [u8; 40] = [
    0x12, 0x01, 0x00, 0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x15, 0x00, 0x06, 0x01, 0x00,
    0x20, 0x00, 0x01, 0x02, 0x00, 0x21, 0x00, 0x01, 0x03, 0x00, 0x22, 0x00, 0x04, 0x04, 0x00,
    0x26, 0x00, 0x01, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

pub struct HealthCheck;

impl HealthCheck {
    pub fn new() -> Self {
        Self
    }

    fn timeout(service: &ServiceDefinition) -> Duration {
        service
            .config_f64("timeout")
            .map(|secs| Duration::from_secs_f64(secs.max(1.0)))
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    async fn probe(service: &ServiceDefinition, timeout: Duration) -> anyhow::Result<()> {
        let addr = format!("{}:{}", service.host, service.port);

        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow::anyhow!("TCP connection to {addr} timed out"))?
            .map_err(|e| anyhow::anyhow!("TCP connection failed: {e}"))?;

        match service.port {
            22 => {
                stream.write_all(b"\n").await?;
                let mut buf = [0u8; 1024];
                let n = tokio::time::timeout(timeout, stream.read(&mut buf))
                    .await
                    .map_err(|_| anyhow::anyhow!("SSH greeting timed out"))??;
                let greeting = String::from_utf8_lossy(&buf[..n]);
                if !greeting.contains("SSH") {
                    anyhow::bail!("not an SSH service");
                }
            }
            1433 => {
                stream.write_all(&TDS_PRELOGIN).await?;
                let mut buf = [0u8; 1024];
                let n = tokio::time::timeout(timeout, stream.read(&mut buf))
                    .await
                    .map_err(|_| anyhow::anyhow!("TDS pre-login response timed out"))??;
                if n == 0 || buf[0] != 0x04 {
                    anyhow::bail!("not a SQL Server service");
                }
            }
            _ => {}
        }

        Ok(())
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Checker for HealthCheck {
    fn name(&self) -> &'static str {
        "default"
    }

    fn description(&self) -> &'static str {
        "Default service health probe (TCP reach with protocol-aware sub-probes)"
    }

    fn supported_devices(&self) -> &'static [DeviceKind] {
        &[
            DeviceKind::Agent,
            DeviceKind::WebModule,
            DeviceKind::Network,
            DeviceKind::Server,
            DeviceKind::Docker,
        ]
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

        if service.host.is_empty() {
            result.report = HealthReport::new(HealthFlag::InvalidConfiguration, "host cannot be empty");
            return Ok(result);
        }

        let timeout = Self::timeout(service);

        tokio::select! {
            probe = Self::probe(service, timeout) => match probe {
                Ok(()) => {
                    debug!("TCP probe succeeded");
                    result.report = HealthReport::healthy();
                }
                Err(e) => {
                    result.report = HealthReport::new(HealthFlag::Escalation, e.to_string());
                }
            },
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
