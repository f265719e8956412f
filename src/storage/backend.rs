//! The narrow persistence interface the engine depends on.
//!
//! Implementations must be `Send + Sync`; the engine shares one instance
//! across all scheduled ticks, the recipient resolver, and the platform
//! config manager.

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::{
    AgentDiskRow, AgentMetricRow, CurrentStatusRow, HistoryRow, NetworkMetricRow, PluginResultRow,
    RecipientRow, ServiceRow,
};

/// Persistence operations, identified by their logical shape. Actual SQL
/// lives in the implementations; the engine never sees statements.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// `load-services`: one row per monitored service.
    async fn load_services(&self) -> StorageResult<Vec<ServiceRow>>;

    /// `load-notification-platforms`: `(name, configuration JSON)` pairs.
    /// The name contains a substring identifying the platform.
    async fn load_notification_platforms(&self) -> StorageResult<Vec<(String, String)>>;

    /// `resolve-recipients-by-services`: flattened recipient rows for the
    /// given comma-joined service-name and monitor-id lists.
    async fn resolve_recipients(
        &self,
        service_names: &str,
        monitor_ids: &str,
    ) -> StorageResult<Vec<RecipientRow>>;

    /// `insert-history` + `upsert-current-status` committed atomically: the
    /// tick's history row, its per-plugin rows, and the current-state update
    /// all land in one transaction or not at all.
    async fn record_tick(
        &self,
        history: &HistoryRow,
        plugin_results: &[PluginResultRow],
        current: &CurrentStatusRow,
    ) -> StorageResult<()>;

    /// `upsert-metrics` (agent): time-series samples, upserted on
    /// `(agent_id, sampled_at)`.
    async fn upsert_agent_metrics(&self, rows: &[AgentMetricRow]) -> StorageResult<()>;

    /// `upsert-metrics` (disk): latest utilization per drive.
    async fn upsert_agent_disks(&self, rows: &[AgentDiskRow]) -> StorageResult<()>;

    /// `upsert-metrics` (network): converted SNMP scalars, upserted on
    /// `(device_ip, metric_name)`.
    async fn upsert_network_metrics(&self, rows: &[NetworkMetricRow]) -> StorageResult<()>;

    /// Recent agent samples, newest first, for threshold scanning.
    async fn query_agent_metrics(
        &self,
        system_monitor_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<AgentMetricRow>>;

    /// Release connections and flush pending writes.
    async fn close(&self) -> StorageResult<()>;
}
