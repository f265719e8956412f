//! Core domain types shared across the monitoring engine.
//!
//! The health flag ordering defined here is load-bearing: merging the
//! default probe with plugin results always keeps the *worst* flag, where
//! worst is defined by [`HealthFlag::severity`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of a monitored target. Governs which plugins may run against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Agent,
    WebModule,
    Network,
    Server,
    Docker,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Agent => "Agent",
            DeviceKind::WebModule => "WebModule",
            DeviceKind::Network => "Network",
            DeviceKind::Server => "Server",
            DeviceKind::Docker => "Docker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Agent" | "AGENT" | "agent" => Some(DeviceKind::Agent),
            "WebModule" | "Web Modules" | "web_module" => Some(DeviceKind::WebModule),
            "Network" | "network" => Some(DeviceKind::Network),
            "Server" | "server" => Some(DeviceKind::Server),
            "Docker" | "docker" => Some(DeviceKind::Docker),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health classification of a service at a point in time.
///
/// `Acknowledged` and `Scheduled` are operator/snooze overrides applied
/// outside the checker pipeline; checkers never produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthFlag {
    Unknown,
    Healthy,
    Escalation,
    Acknowledged,
    Degraded,
    InvalidConfiguration,
    Scheduled,
}

impl HealthFlag {
    /// Merge ordering: Healthy < Escalation < Degraded < InvalidConfiguration
    /// < Unknown. Higher means worse.
    pub fn severity(&self) -> u8 {
        match self {
            HealthFlag::Healthy => 0,
            HealthFlag::Escalation => 1,
            HealthFlag::Degraded => 2,
            HealthFlag::InvalidConfiguration => 3,
            HealthFlag::Unknown => 4,
            // Operator overrides; excluded from checker merges.
            HealthFlag::Acknowledged => 0,
            HealthFlag::Scheduled => 0,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthFlag::Healthy)
    }

    /// Flags that may drive alert emission. InvalidConfiguration is surfaced
    /// on the status store and in history but never alerts until the operator
    /// fixes the configuration.
    pub fn is_alertable(&self) -> bool {
        matches!(self, HealthFlag::Escalation | HealthFlag::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthFlag::Unknown => "Unknown",
            HealthFlag::Healthy => "Healthy",
            HealthFlag::Escalation => "Escalation",
            HealthFlag::Acknowledged => "Acknowledged",
            HealthFlag::Degraded => "Degraded",
            HealthFlag::InvalidConfiguration => "InvalidConfiguration",
            HealthFlag::Scheduled => "Scheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Unknown" => Some(HealthFlag::Unknown),
            "Healthy" => Some(HealthFlag::Healthy),
            "Escalation" => Some(HealthFlag::Escalation),
            "Acknowledged" => Some(HealthFlag::Acknowledged),
            "Degraded" => Some(HealthFlag::Degraded),
            "InvalidConfiguration" => Some(HealthFlag::InvalidConfiguration),
            "Scheduled" => Some(HealthFlag::Scheduled),
            _ => None,
        }
    }
}

impl std::fmt::Display for HealthFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-facing health classification attached to every monitoring result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub flag: HealthFlag,
    pub name: String,
    pub description: String,
    pub color: String,
}

impl HealthReport {
    /// Build a report with the fixed presentation vocabulary for `flag`.
    /// `description` may be empty; the merger appends suffixes as needed.
    pub fn new(flag: HealthFlag, description: impl Into<String>) -> Self {
        let (name, color) = match flag {
            HealthFlag::Healthy => ("Active Systems", "#2ecc71"),
            HealthFlag::Escalation => ("Escalated Systems", "#e67e22"),
            HealthFlag::Degraded => ("Inactive Systems", "#e74c3c"),
            HealthFlag::Acknowledged => ("Inactive Acknowledged Systems", "#95a5a6"),
            HealthFlag::InvalidConfiguration => ("Misconfigured Systems", "#9b59b6"),
            HealthFlag::Scheduled => ("Scheduled for Maintenance", "#3498db"),
            HealthFlag::Unknown => ("Unknown", "#7f8c8d"),
        };

        Self {
            flag,
            name: name.to_string(),
            description: description.into(),
            color: color.to_string(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthFlag::Healthy, "")
    }
}

/// Outcome of one check tick for one checker (default probe or plugin).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringResult {
    pub system_monitor_id: Uuid,

    /// "default" for the health probe, otherwise the plugin name.
    pub plugin_id: String,

    pub report: HealthReport,

    pub last_check_time: DateTime<Utc>,

    /// Latest instant at which the merged flag was Healthy.
    pub last_service_up_time: Option<DateTime<Utc>>,

    /// Consecutive non-Healthy results; zeroed on any Healthy result.
    pub failure_count: u32,
}

impl MonitoringResult {
    pub fn new(system_monitor_id: Uuid, plugin_id: impl Into<String>, report: HealthReport) -> Self {
        Self {
            system_monitor_id,
            plugin_id: plugin_id.into(),
            report,
            last_check_time: Utc::now(),
            last_service_up_time: None,
            failure_count: 0,
        }
    }
}

/// Merge the default probe report with zero or more plugin reports.
///
/// The worst flag by [`HealthFlag::severity`] wins. When any plugin is
/// non-Healthy the merged description is the fixed plugin-failure prefix
/// followed by the worst offending plugin's description.
pub fn merge_reports(default: &HealthReport, plugins: &[&HealthReport]) -> HealthReport {
    let mut worst = default.clone();

    for report in plugins {
        if report.flag.severity() > worst.flag.severity() {
            worst = (*report).clone();
        }
    }

    let any_plugin_failed = plugins.iter().any(|r| !r.flag.is_healthy());
    if any_plugin_failed && !worst.flag.is_healthy() {
        let offending = plugins
            .iter()
            .filter(|r| !r.flag.is_healthy())
            .max_by_key(|r| r.flag.severity())
            .expect("at least one failing plugin");

        let mut merged = HealthReport::new(worst.flag, "");
        merged.description = if offending.description.is_empty() {
            "Plugin Failure Detected".to_string()
        } else {
            format!("Plugin Failure Detected: {}", offending.description)
        };
        return merged;
    }

    worst
}

/// Severity attached to an alert event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => f.write_str("warning"),
            AlertSeverity::Critical => f.write_str("critical"),
        }
    }
}

/// Record crossing the alert channel when a sustained failure requires
/// notification. Destroyed after the alert processor completes fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub system_monitor_id: Uuid,
    pub service_name: String,
    pub device: DeviceKind,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub agent_api_base_url: Option<String>,
}

/// One resolved notification recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_name: String,
    pub email: String,
    pub phone_number: String,
    pub slack_id: String,
    pub group_name: String,
    pub platform: String,
}

/// Recipients resolved for one `(system_monitor_id, service_name)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientBundle {
    pub users: Vec<Recipient>,
}

/// Composite key used by the recipient resolver and dispatcher.
pub fn recipient_key(system_monitor_id: &Uuid, service_name: &str) -> String {
    format!("{system_monitor_id}|{service_name}")
}

/// The monitored target as loaded from the inventory source.
///
/// Definitions are read-only snapshots between inventory reloads; the engine
/// never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub system_monitor_id: Uuid,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub device: DeviceKind,

    pub is_monitored: bool,
    pub is_acknowledged: bool,
    pub snooze_until: Option<DateTime<Utc>>,

    /// Cron expression; empty or invalid falls back to the system default.
    pub check_interval: String,

    /// Ordered plugin names, each resolving to a loaded checker.
    pub plugins: Vec<String>,

    pub agent_api_base_url: Option<String>,

    /// Opaque per-plugin settings; schema owned by the referenced plugin.
    pub configuration: serde_json::Map<String, serde_json::Value>,
}

impl ServiceDefinition {
    /// Whether checks for this service are currently snoozed.
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snooze_until.map(|until| now < until).unwrap_or(false)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(|v| v.as_str())
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.configuration.get(key).and_then(|v| v.as_f64())
    }
}
