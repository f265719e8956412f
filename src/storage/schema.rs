//! Typed row shapes exchanged with the persistence layer.
//!
//! These mirror the logical operations the engine depends on: the inventory
//! row, the per-tick history/current rows, recipient rows, and the
//! MERGE-style metric sinks fed by the agent and SNMP plugins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{HealthFlag, MonitoringResult, ServiceDefinition};

/// One row of the `load-services` operation, exactly as stored. Decoding
/// into a [`ServiceDefinition`] happens in the inventory loader so that a
/// malformed row degrades a single service, not the whole load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRow {
    pub system_monitor_id: String,
    pub name: String,
    pub host: String,
    pub port: i64,
    pub is_monitored: bool,
    pub current_health_check: String,
    pub device: String,
    pub failure_count: i64,
    pub retry_count: i64,
    pub configuration_json: String,
    pub check_interval: String,
    pub is_acknowledged: bool,
    pub snooze_until: Option<DateTime<Utc>>,
    pub plugins_json: String,
    pub agent_api_base_url: Option<String>,
}

/// History row appended once per tick with a fresh identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub history_id: Uuid,
    pub system_monitor_id: Uuid,
    pub service_name: String,
    pub flag: HealthFlag,
    pub description: String,
    pub failure_count: u32,
    pub checked_at: DateTime<Utc>,
}

/// Per-plugin result row keyed by the owning history row.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginResultRow {
    pub history_id: Uuid,
    pub plugin_id: String,
    pub flag: HealthFlag,
    pub description: String,
    pub checked_at: DateTime<Utc>,
}

/// `upsert-current-status` payload for the service's inventory row.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentStatusRow {
    pub service_name: String,
    pub current_health_check: HealthFlag,
    pub last_service_up_time: Option<DateTime<Utc>>,
    pub last_check_time: DateTime<Utc>,
    pub failure_count: u32,
}

impl CurrentStatusRow {
    pub fn from_result(service: &ServiceDefinition, result: &MonitoringResult) -> Self {
        Self {
            service_name: service.name.clone(),
            current_health_check: result.report.flag,
            last_service_up_time: result.last_service_up_time,
            last_check_time: result.last_check_time,
            failure_count: result.failure_count,
        }
    }
}

/// Flattened recipient row from `resolve-recipients-by-services`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRow {
    pub system_monitor_id: Uuid,
    pub service_name: String,
    pub user_name: String,
    pub email: String,
    pub phone_number: String,
    pub slack_id: String,
    pub group_name: String,
    pub platform: String,
}

/// One agent CPU/memory sample, upserted on `(agent_id, sampled_at)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMetricRow {
    pub agent_id: String,
    pub system_monitor_id: Uuid,
    pub sampled_at: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

/// Latest disk utilization per agent drive, upserted on `(agent_id, drive)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDiskRow {
    pub agent_id: String,
    pub drive: String,
    pub size_bytes: i64,
    pub free_bytes: i64,
    pub used_bytes: i64,
    pub updated_at: DateTime<Utc>,
}

/// One converted SNMP scalar, upserted on `(device_ip, metric_name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMetricRow {
    pub system_monitor_id: Uuid,
    pub device_ip: String,
    pub metric_name: String,
    pub metric_description: String,
    pub metric_value: String,
    pub last_poll: DateTime<Utc>,
}
