//! TLS certificate plugin: opens a handshake and classifies the leaf
//! certificate's remaining validity.
//!
//! Verification is disabled for the probe itself so expired or self-signed
//! leaves can still be inspected and classified precisely.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpStream;
use tracing::instrument;

use crate::model::{DeviceKind, HealthFlag, HealthReport, MonitoringResult, ServiceDefinition};
use crate::shutdown::Shutdown;

use super::{Checker, CheckerConfig};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TLS_PORT: u16 = 443;
const EXPIRY_WARNING_DAYS: i64 = 7;

pub struct SslCheckPlugin;

impl SslCheckPlugin {
    pub fn new() -> Self {
        Self
    }

    async fn leaf_days_remaining(host: &str, port: u16, timeout: Duration) -> anyhow::Result<Option<i64>> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| anyhow::anyhow!("TLS connector setup failed: {e}"))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);

        let addr = format!("{host}:{port}");
        let tcp = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow::anyhow!("TLS connection to {addr} timed out"))?
            .map_err(|e| anyhow::anyhow!("TCP connection failed: {e}"))?;

        let stream = tokio::time::timeout(timeout, connector.connect(host, tcp))
            .await
            .map_err(|_| anyhow::anyhow!("TLS handshake timed out"))?
            .map_err(|e| anyhow::anyhow!("TLS handshake failed: {e}"))?;

        let Some(certificate) = stream
            .get_ref()
            .peer_certificate()
            .map_err(|e| anyhow::anyhow!("failed to read peer certificate: {e}"))?
        else {
            return Ok(None);
        };

        let der = certificate
            .to_der()
            .map_err(|e| anyhow::anyhow!("failed to encode peer certificate: {e}"))?;
        let (_, parsed) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| anyhow::anyhow!("failed to parse peer certificate: {e}"))?;

        let not_after = parsed.validity().not_after.timestamp();
        let seconds_remaining = not_after - Utc::now().timestamp();

        Ok(Some(seconds_remaining.div_euclid(86_400)))
    }

    fn classify(days_remaining: Option<i64>) -> HealthReport {
        match days_remaining {
            None => HealthReport::new(HealthFlag::Escalation, "no TLS certificates found"),
            Some(days) if days <= 0 => HealthReport::new(
                HealthFlag::Escalation,
                format!("certificate expired {} days ago", -days),
            ),
            Some(days) if days <= EXPIRY_WARNING_DAYS => HealthReport::new(
                HealthFlag::Degraded,
                format!("certificate is expiring in {days} days"),
            ),
            Some(_) => HealthReport::healthy(),
        }
    }
}

impl Default for SslCheckPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Checker for SslCheckPlugin {
    fn name(&self) -> &'static str {
        "ssl_check"
    }

    fn description(&self) -> &'static str {
        "Checks TLS certificate validity and expiration"
    }

    fn supported_devices(&self) -> &'static [DeviceKind] {
        &[DeviceKind::WebModule, DeviceKind::Server]
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

        let port = if service.port == 0 { DEFAULT_TLS_PORT } else { service.port };
        let timeout = service
            .config_f64("timeout")
            .map(|secs| Duration::from_secs_f64(secs.max(1.0)))
            .unwrap_or(DEFAULT_TIMEOUT);

        tokio::select! {
            days = Self::leaf_days_remaining(&service.host, port, timeout) => {
                result.report = match days {
                    Ok(days) => Self::classify(days),
                    Err(e) => HealthReport::new(HealthFlag::Escalation, e.to_string()),
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
