//! Process configuration: environment variables plus the `services.json`
//! fallback inventory file.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::trace;
use uuid::Uuid;

use crate::model::{DeviceKind, ServiceDefinition};

const WS_PORT: &str = "WS_PORT";
const DEFAULT_WS_PORT: u16 = 2345;

const REPORT_HOUR_INTERVAL: &str = "REPORT_HOUR_INTERVAL";
const DEFAULT_REPORT_HOUR_INTERVAL: u32 = 1;

const DATABASE_URL: &str = "DATABASE_URL";
const DEFAULT_DATABASE_URL: &str = "sqlite://monitoring.db?mode=rwc";

const SERVICES_FILE: &str = "SERVICES_FILE";
const DEFAULT_SERVICES_FILE: &str = "services.json";

const SMTP_PASSWORD: &str = "SMTP_PASSWORD";
const SLACK_BOT_TOKEN: &str = "SLACK_BOT_TOKEN";

/// Environment-derived configuration. Unknown environment keys are ignored;
/// malformed values for known keys fail startup with a precise error.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Port the broadcast hub's WebSocket server binds to.
    pub ws_port: u16,

    /// Cadence for the external report generator (read by that collaborator,
    /// not by the engine).
    pub report_hour_interval: u32,

    pub database_url: String,

    /// Fallback inventory file used when the primary source fails.
    pub services_file: String,

    /// Secret overrides applied on top of the platform configs loaded from
    /// the store.
    pub smtp_password: Option<String>,
    pub slack_bot_token: Option<String>,
}

impl EnvConfig {
    pub fn load() -> anyhow::Result<Self> {
        let ws_port = match std::env::var(WS_PORT) {
            Ok(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {WS_PORT} value {raw:?}: {e}"))?,
            Err(_) => DEFAULT_WS_PORT,
        };

        let report_hour_interval = match std::env::var(REPORT_HOUR_INTERVAL) {
            Ok(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {REPORT_HOUR_INTERVAL} value {raw:?}: {e}"))?,
            Err(_) => DEFAULT_REPORT_HOUR_INTERVAL,
        };

        let config = Self {
            ws_port,
            report_hour_interval,
            database_url: std::env::var(DATABASE_URL)
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            services_file: std::env::var(SERVICES_FILE)
                .unwrap_or_else(|_| DEFAULT_SERVICES_FILE.to_string()),
            smtp_password: std::env::var(SMTP_PASSWORD).ok(),
            slack_bot_token: std::env::var(SLACK_BOT_TOKEN).ok(),
        };

        trace!("loaded env config: ws_port={} db={}", config.ws_port, config.database_url);
        Ok(config)
    }
}

/// Engine-level tuning constants. Defaults mirror the system constants; tests
/// override individual fields.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Consecutive failures required before alerts are considered.
    pub failure_threshold: u32,

    /// Suppression window after a successful alert emission.
    pub alert_throttle: chrono::Duration,

    /// Bounded alert channel capacity.
    pub alert_buffer_size: usize,

    /// Cron expression applied when a service's interval is empty or invalid.
    pub default_interval: String,

    /// Upper bound on plugins per service definition.
    pub max_plugins_per_service: usize,

    /// Outer ceiling applied to each plugin check.
    pub plugin_check_ceiling: std::time::Duration,

    /// Ceiling on waiting for in-flight ticks during shutdown.
    pub graceful_stop: std::time::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            alert_throttle: chrono::Duration::minutes(5),
            alert_buffer_size: 100,
            default_interval: "*/15 * * * *".to_string(),
            max_plugins_per_service: 8,
            plugin_check_ceiling: std::time::Duration::from_secs(60),
            graceful_stop: std::time::Duration::from_secs(15),
        }
    }
}

/// One entry of the `services.json` fallback inventory. Field names mirror
/// the primary source's row shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceFileEntry {
    #[serde(rename = "SystemMonitorId")]
    pub system_monitor_id: Uuid,
    #[serde(rename = "ServiceName")]
    pub name: String,
    #[serde(rename = "IPAddress")]
    pub host: String,
    #[serde(rename = "Port", default)]
    pub port: u16,
    #[serde(rename = "Device")]
    pub device: String,
    #[serde(rename = "IsMonitored", default = "default_true")]
    pub is_monitored: bool,
    #[serde(rename = "IsAcknowledged", default)]
    pub is_acknowledged: bool,
    #[serde(rename = "SnoozeUntil", default)]
    pub snooze_until: Option<DateTime<Utc>>,
    #[serde(rename = "CheckInterval", default)]
    pub check_interval: String,
    #[serde(rename = "Plugins", default)]
    pub plugins: Vec<String>,
    #[serde(rename = "AgentApiBaseUrl", default)]
    pub agent_api_base_url: Option<String>,
    #[serde(rename = "Configuration", default)]
    pub configuration: serde_json::Map<String, serde_json::Value>,
}

impl ServiceFileEntry {
    pub fn into_definition(self) -> anyhow::Result<ServiceDefinition> {
        let device = DeviceKind::parse(&self.device).ok_or_else(|| {
            anyhow::anyhow!("unknown device kind {:?} for service {:?}", self.device, self.name)
        })?;

        Ok(ServiceDefinition {
            system_monitor_id: self.system_monitor_id,
            name: self.name,
            host: self.host,
            port: self.port,
            device,
            is_monitored: self.is_monitored,
            is_acknowledged: self.is_acknowledged,
            snooze_until: self.snooze_until,
            check_interval: self.check_interval,
            plugins: self.plugins,
            agent_api_base_url: self.agent_api_base_url,
            configuration: self.configuration,
        })
    }
}

fn default_true() -> bool {
    true
}

/// Read the fallback inventory file.
pub fn read_services_file(path: &str) -> anyhow::Result<Vec<ServiceDefinition>> {
    let file_content = std::fs::read_to_string(path)?;
    let entries: Vec<ServiceFileEntry> = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid services file {path:?}: {e}"))?;

    entries.into_iter().map(ServiceFileEntry::into_definition).collect()
}
