//! SNMP collector plugin: resolves the session version from configuration,
//! issues a Get over the configured metric OID set, converts each PDU value
//! to a typed scalar, applies optional scaling, and persists the results.
//!
//! The protocol library is an external collaborator kept behind the
//! [`SnmpTransport`] trait; the production adapter drives `snmp2` sessions
//! on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::model::{DeviceKind, HealthFlag, HealthReport, MonitoringResult, ServiceDefinition};
use crate::shutdown::Shutdown;
use crate::storage::schema::NetworkMetricRow;
use crate::storage::MonitorStore;

use super::{Checker, CheckerConfig};

const SNMP_PORT: u16 = 161;
const SNMP_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: u32 = 3;

/// Session parameters resolved from the service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpSessionParams {
    pub target: String,
    pub port: u16,
    pub auth: SnmpAuth,
    pub timeout: Duration,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpAuth {
    /// Community-based v2c; defaults to "public".
    V2c { community: String },

    /// USM v3; the privacy passphrase selects AuthPriv over AuthNoPriv.
    V3 {
        user: String,
        auth_passphrase: String,
        priv_passphrase: Option<String>,
    },
}

/// Typed scalar converted from one PDU value.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpScalar {
    Integer(i64),
    Counter32(u32),
    Gauge32(u32),
    Counter64(u64),
    TimeTicks(u32),
    Text(String),
    IpAddress(String),
    ObjectIdentifier(String),
}

impl SnmpScalar {
    /// Apply the configured scaling divisor to numeric scalars.
    pub fn scaled(self, scale: i64) -> Self {
        if scale <= 1 {
            return self;
        }
        match self {
            SnmpScalar::Integer(v) => SnmpScalar::Integer(v / scale),
            SnmpScalar::Counter32(v) => SnmpScalar::Counter32(v / scale as u32),
            SnmpScalar::Gauge32(v) => SnmpScalar::Gauge32(v / scale as u32),
            SnmpScalar::Counter64(v) => SnmpScalar::Counter64(v / scale as u64),
            other => other,
        }
    }
}

impl std::fmt::Display for SnmpScalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnmpScalar::Integer(v) => write!(f, "{v}"),
            SnmpScalar::Counter32(v) | SnmpScalar::Gauge32(v) | SnmpScalar::TimeTicks(v) => {
                write!(f, "{v}")
            }
            SnmpScalar::Counter64(v) => write!(f, "{v}"),
            SnmpScalar::Text(v) | SnmpScalar::IpAddress(v) | SnmpScalar::ObjectIdentifier(v) => {
                f.write_str(v)
            }
        }
    }
}

#[derive(Debug)]
pub enum SnmpTransportError {
    /// Session could not be opened or the device did not answer at all.
    Network(String),

    /// The device answered but some OIDs could not be retrieved.
    Partial { missing: usize, total: usize },
}

/// Narrow session interface over the SNMP protocol library: one batched Get
/// over the configured OID set.
pub trait SnmpTransport: Send + Sync {
    fn get_batch(
        &self,
        params: &SnmpSessionParams,
        oids: &[String],
    ) -> Result<Vec<(String, SnmpScalar)>, SnmpTransportError>;
}

/// Production transport backed by `snmp2` synchronous sessions.
pub struct Snmp2Transport;

impl SnmpTransport for Snmp2Transport {
    fn get_batch(
        &self,
        params: &SnmpSessionParams,
        oids: &[String],
    ) -> Result<Vec<(String, SnmpScalar)>, SnmpTransportError> {
        let addr = format!("{}:{}", params.target, params.port);

        let mut session = match &params.auth {
            SnmpAuth::V2c { community } => snmp2::SyncSession::new_v2c(
                addr.as_str(),
                community.as_bytes(),
                Some(params.timeout),
                0,
            )
            .map_err(|e| SnmpTransportError::Network(format!("session open failed: {e:?}")))?,
            SnmpAuth::V3 {
                user,
                auth_passphrase,
                priv_passphrase,
            } => {
                let mut security = snmp2::v3::Security::new(user.as_bytes(), auth_passphrase.as_bytes());
                if let Some(priv_passphrase) = priv_passphrase {
                    security = security.with_auth(snmp2::v3::Auth::AuthPriv {
                        cipher: snmp2::v3::Cipher::Des,
                        privacy_password: priv_passphrase.as_bytes().to_vec(),
                    });
                }
                snmp2::SyncSession::new_v3(addr.as_str(), Some(params.timeout), 0, security)
                    .map_err(|e| SnmpTransportError::Network(format!("v3 session open failed: {e:?}")))?
            }
        };

        let mut values = Vec::with_capacity(oids.len());
        let mut missing = 0usize;

        for oid_str in oids {
            let Some(oid) = parse_oid(oid_str) else {
                missing += 1;
                continue;
            };

            match session.get(&oid) {
                Ok(pdu) => {
                    let mut found = false;
                    for (name, value) in pdu.varbinds {
                        if let Some(scalar) = convert_value(&value) {
                            values.push((format!("{name}"), scalar));
                            found = true;
                        }
                    }
                    if !found {
                        missing += 1;
                    }
                }
                Err(e) => {
                    debug!(oid = %oid_str, "SNMP get failed: {e:?}");
                    missing += 1;
                }
            }
        }

        if values.is_empty() && missing > 0 {
            return Err(SnmpTransportError::Network("no OIDs answered".to_string()));
        }
        if missing > 0 {
            return Err(SnmpTransportError::Partial { missing, total: oids.len() });
        }

        Ok(values)
    }
}

fn parse_oid(dotted: &str) -> Option<snmp2::Oid<'static>> {
    let parts: Vec<u64> = dotted
        .trim_start_matches('.')
        .split('.')
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    snmp2::Oid::from(parts.as_slice()).ok()
}

fn convert_value(value: &snmp2::Value) -> Option<SnmpScalar> {
    use snmp2::Value;

    match value {
        Value::Integer(v) => Some(SnmpScalar::Integer(*v)),
        Value::Counter32(v) => Some(SnmpScalar::Counter32(*v)),
        Value::Unsigned32(v) => Some(SnmpScalar::Gauge32(*v)),
        Value::Counter64(v) => Some(SnmpScalar::Counter64(*v)),
        Value::Timeticks(v) => Some(SnmpScalar::TimeTicks(*v)),
        Value::OctetString(bytes) => Some(SnmpScalar::Text(String::from_utf8_lossy(bytes).into_owned())),
        Value::IpAddress(octets) => Some(SnmpScalar::IpAddress(
            std::net::Ipv4Addr::from(*octets).to_string(),
        )),
        Value::ObjectIdentifier(oid) => Some(SnmpScalar::ObjectIdentifier(format!("{oid}"))),
        _ => None,
    }
}

/// One configured metric OID.
#[derive(Debug, Clone, Deserialize)]
pub struct SnmpMetricConfig {
    pub oid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "metricType", default)]
    pub metric_type: String,
    #[serde(default)]
    pub scale: i64,
    #[serde(default)]
    pub unit: String,
}

fn default_metrics() -> Vec<SnmpMetricConfig> {
    vec![
        SnmpMetricConfig {
            oid: "1.3.6.1.2.1.1.5.0".to_string(),
            name: "sysName".to_string(),
            description: "System Name".to_string(),
            metric_type: "string".to_string(),
            scale: 0,
            unit: String::new(),
        },
        SnmpMetricConfig {
            oid: "1.3.6.1.2.1.1.1.0".to_string(),
            name: "sysDescr".to_string(),
            description: "System Description".to_string(),
            metric_type: "string".to_string(),
            scale: 0,
            unit: String::new(),
        },
    ]
}

/// Resolve session parameters from a service's opaque configuration.
/// Missing credentials for the selected version are an invalid
/// configuration, reported before any session is opened.
pub fn resolve_session(
    service: &ServiceDefinition,
) -> Result<(SnmpSessionParams, Vec<SnmpMetricConfig>), String> {
    if service.host.is_empty() {
        return Err("host cannot be empty".to_string());
    }

    let version = service
        .config_str("snmpVersion")
        .map(|v| v.trim().to_lowercase())
        .unwrap_or_else(|| "v2".to_string());

    let auth = match version.as_str() {
        "v2" | "v2c" => SnmpAuth::V2c {
            community: service
                .config_str("communityString")
                .filter(|s| !s.is_empty())
                .unwrap_or("public")
                .to_string(),
        },
        "v3" => {
            let user = service.config_str("authUsernameV3").unwrap_or_default();
            let auth_passphrase = service.config_str("authPasswordV3").unwrap_or_default();
            if user.is_empty() || auth_passphrase.is_empty() {
                return Err("SNMP v3 requires authUsernameV3 and authPasswordV3".to_string());
            }
            SnmpAuth::V3 {
                user: user.to_string(),
                auth_passphrase: auth_passphrase.to_string(),
                priv_passphrase: service
                    .config_str("privPassword")
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            }
        }
        other => return Err(format!("unsupported SNMP version {other:?}")),
    };

    let metrics = match service.configuration.get("snmpMetrics") {
        None => default_metrics(),
        Some(serde_json::Value::String(raw)) => serde_json::from_str(raw)
            .map_err(|e| format!("invalid snmpMetrics configuration: {e}"))?,
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| format!("invalid snmpMetrics configuration: {e}"))?,
    };

    let params = SnmpSessionParams {
        target: service.host.clone(),
        port: if service.port == 0 { SNMP_PORT } else { service.port },
        auth,
        timeout: SNMP_TIMEOUT,
        retries: MAX_RETRIES,
    };

    Ok((params, metrics))
}

pub struct NetworkSnmpPlugin {
    store: Arc<dyn MonitorStore>,
    transport: Arc<dyn SnmpTransport>,
}

impl NetworkSnmpPlugin {
    pub fn new(store: Arc<dyn MonitorStore>) -> Self {
        Self {
            store,
            transport: Arc::new(Snmp2Transport),
        }
    }

    pub fn with_transport(store: Arc<dyn MonitorStore>, transport: Arc<dyn SnmpTransport>) -> Self {
        Self { store, transport }
    }

    fn metric_rows(
        service: &ServiceDefinition,
        metrics: &[SnmpMetricConfig],
        values: &[(String, SnmpScalar)],
    ) -> Vec<NetworkMetricRow> {
        let now = Utc::now();

        metrics
            .iter()
            .zip(values.iter())
            .map(|(metric, (_oid, scalar))| {
                let scaled = scalar.clone().scaled(metric.scale);
                NetworkMetricRow {
                    system_monitor_id: service.system_monitor_id,
                    device_ip: service.host.clone(),
                    metric_name: if metric.name.is_empty() {
                        metric.oid.clone()
                    } else {
                        metric.name.clone()
                    },
                    metric_description: metric.description.clone(),
                    metric_value: scaled.to_string(),
                    last_poll: now,
                }
            })
            .collect()
    }
}

#[async_trait]
impl Checker for NetworkSnmpPlugin {
    fn name(&self) -> &'static str {
        "network_snmp"
    }

    fn description(&self) -> &'static str {
        "SNMP network data collector"
    }

    fn supported_devices(&self) -> &'static [DeviceKind] {
        &[DeviceKind::Network]
    }

    /// Credential validation happens here so misconfigured devices are
    /// caught at inventory load, before any session is opened.
    async fn initialize(&self, configuration: &CheckerConfig) -> anyhow::Result<()> {
        let version = configuration
            .get("snmpVersion")
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_lowercase())
            .unwrap_or_else(|| "v2".to_string());

        if version == "v3" {
            let user = configuration.get("authUsernameV3").and_then(|v| v.as_str());
            let pass = configuration.get("authPasswordV3").and_then(|v| v.as_str());
            if user.map_or(true, str::is_empty) || pass.map_or(true, str::is_empty) {
                anyhow::bail!("SNMP v3 requires authUsernameV3 and authPasswordV3");
            }
        } else if !matches!(version.as_str(), "v2" | "v2c") {
            anyhow::bail!("unsupported SNMP version {version:?}");
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

        let (params, metrics) = match resolve_session(service) {
            Ok(resolved) => resolved,
            Err(reason) => {
                result.report = HealthReport::new(HealthFlag::InvalidConfiguration, reason);
                return Ok(result);
            }
        };

        let oids: Vec<String> = metrics.iter().map(|m| m.oid.clone()).collect();
        let transport = self.transport.clone();
        let batch_params = params.clone();

        let collect = tokio::task::spawn_blocking(move || transport.get_batch(&batch_params, &oids));

        let outcome = tokio::select! {
            joined = collect => joined,
            _ = shutdown.cancelled() => {
                result.report = HealthReport::new(HealthFlag::Degraded, "check aborted");
                return Ok(result);
            }
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("SNMP collection task failed: {e}");
                result.report =
                    HealthReport::new(HealthFlag::Degraded, "SNMP collection task failed");
                return Ok(result);
            }
        };

        result.report = match outcome {
            Ok(values) => {
                let rows = Self::metric_rows(service, &metrics, &values);
                match self.store.upsert_network_metrics(&rows).await {
                    Ok(()) => {
                        debug!(metrics = rows.len(), "SNMP metrics persisted");
                        HealthReport::healthy()
                    }
                    Err(e) => HealthReport::new(
                        HealthFlag::Escalation,
                        format!("error saving metrics to database: {e}"),
                    ),
                }
            }
            Err(SnmpTransportError::Partial { missing, total }) => HealthReport::new(
                HealthFlag::Escalation,
                format!("metric collection incomplete: {missing} of {total} OIDs missing"),
            ),
            Err(SnmpTransportError::Network(msg)) => HealthReport::new(
                HealthFlag::Degraded,
                format!("error connecting to network device SNMP: {msg}"),
            ),
        };

        Ok(result)
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
