//! In-memory `MonitorStore` (no persistence).
//!
//! Used by tests and as a stand-in when no database is reachable. Supports
//! seeding inventory/platform/recipient rows and inspecting everything the
//! engine wrote.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::MonitorStore;
use super::error::{StorageError, StorageResult};
use super::schema::{
    AgentDiskRow, AgentMetricRow, CurrentStatusRow, HistoryRow, NetworkMetricRow, PluginResultRow,
    RecipientRow, ServiceRow,
};

#[derive(Default)]
struct Inner {
    services: Vec<ServiceRow>,
    platforms: Vec<(String, String)>,
    recipients: Vec<RecipientRow>,

    history: Vec<HistoryRow>,
    plugin_results: Vec<PluginResultRow>,
    current: HashMap<String, CurrentStatusRow>,

    agent_metrics: HashMap<(String, i64), AgentMetricRow>,
    agent_disks: HashMap<(String, String), AgentDiskRow>,
    network_metrics: HashMap<(String, String), NetworkMetricRow>,

    fail_service_load: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_services(&self, rows: Vec<ServiceRow>) {
        self.inner.write().await.services = rows;
    }

    pub async fn seed_platforms(&self, rows: Vec<(String, String)>) {
        self.inner.write().await.platforms = rows;
    }

    pub async fn seed_recipients(&self, rows: Vec<RecipientRow>) {
        self.inner.write().await.recipients = rows;
    }

    /// Make `load_services` fail, forcing the file fallback path.
    pub async fn fail_service_load(&self, fail: bool) {
        self.inner.write().await.fail_service_load = fail;
    }

    pub async fn history(&self) -> Vec<HistoryRow> {
        self.inner.read().await.history.clone()
    }

    pub async fn plugin_results(&self) -> Vec<PluginResultRow> {
        self.inner.read().await.plugin_results.clone()
    }

    pub async fn current_status(&self, service_name: &str) -> Option<CurrentStatusRow> {
        self.inner.read().await.current.get(service_name).cloned()
    }

    pub async fn network_metric(&self, device_ip: &str, metric_name: &str) -> Option<NetworkMetricRow> {
        self.inner
            .read()
            .await
            .network_metrics
            .get(&(device_ip.to_string(), metric_name.to_string()))
            .cloned()
    }

    pub async fn agent_disk(&self, agent_id: &str, drive: &str) -> Option<AgentDiskRow> {
        self.inner
            .read()
            .await
            .agent_disks
            .get(&(agent_id.to_string(), drive.to_string()))
            .cloned()
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn load_services(&self) -> StorageResult<Vec<ServiceRow>> {
        let inner = self.inner.read().await;
        if inner.fail_service_load {
            return Err(StorageError::OperationFailed("injected load failure".to_string()));
        }
        Ok(inner.services.clone())
    }

    async fn load_notification_platforms(&self) -> StorageResult<Vec<(String, String)>> {
        Ok(self.inner.read().await.platforms.clone())
    }

    async fn resolve_recipients(
        &self,
        service_names: &str,
        monitor_ids: &str,
    ) -> StorageResult<Vec<RecipientRow>> {
        let names: Vec<&str> = service_names.split(',').filter(|s| !s.is_empty()).collect();
        let ids: Vec<&str> = monitor_ids.split(',').filter(|s| !s.is_empty()).collect();

        Ok(self
            .inner
            .read()
            .await
            .recipients
            .iter()
            .filter(|r| {
                names.contains(&r.service_name.as_str())
                    || ids.contains(&r.system_monitor_id.to_string().as_str())
            })
            .cloned()
            .collect())
    }

    async fn record_tick(
        &self,
        history: &HistoryRow,
        plugin_results: &[PluginResultRow],
        current: &CurrentStatusRow,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.history.push(history.clone());
        inner.plugin_results.extend_from_slice(plugin_results);
        inner
            .current
            .insert(current.service_name.clone(), current.clone());

        debug!(service = %current.service_name, "tick recorded in memory store");
        Ok(())
    }

    async fn upsert_agent_metrics(&self, rows: &[AgentMetricRow]) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for row in rows {
            inner
                .agent_metrics
                .insert((row.agent_id.clone(), row.sampled_at.timestamp_millis()), row.clone());
        }
        Ok(())
    }

    async fn upsert_agent_disks(&self, rows: &[AgentDiskRow]) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for row in rows {
            inner
                .agent_disks
                .insert((row.agent_id.clone(), row.drive.clone()), row.clone());
        }
        Ok(())
    }

    async fn upsert_network_metrics(&self, rows: &[NetworkMetricRow]) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for row in rows {
            inner
                .network_metrics
                .insert((row.device_ip.clone(), row.metric_name.clone()), row.clone());
        }
        Ok(())
    }

    async fn query_agent_metrics(
        &self,
        system_monitor_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<AgentMetricRow>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<AgentMetricRow> = inner
            .agent_metrics
            .values()
            .filter(|r| r.system_monitor_id.to_string() == system_monitor_id)
            .cloned()
            .collect();

        rows.sort_by_key(|r| std::cmp::Reverse(r.sampled_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HealthFlag;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_record_tick_and_inspect() {
        let store = MemoryStore::new();
        let monitor_id = Uuid::new_v4();
        let now = Utc::now();

        let history = HistoryRow {
            history_id: Uuid::new_v4(),
            system_monitor_id: monitor_id,
            service_name: "svc".to_string(),
            flag: HealthFlag::Healthy,
            description: String::new(),
            failure_count: 0,
            checked_at: now,
        };
        let current = CurrentStatusRow {
            service_name: "svc".to_string(),
            current_health_check: HealthFlag::Healthy,
            last_service_up_time: Some(now),
            last_check_time: now,
            failure_count: 0,
        };

        store.record_tick(&history, &[], &current).await.unwrap();

        assert_eq!(store.history().await.len(), 1);
        let stored = store.current_status("svc").await.unwrap();
        assert_eq!(stored.current_health_check, HealthFlag::Healthy);
    }

    #[tokio::test]
    async fn test_injected_load_failure() {
        let store = MemoryStore::new();
        store.fail_service_load(true).await;
        assert!(store.load_services().await.is_err());

        store.fail_service_load(false).await;
        assert!(store.load_services().await.is_ok());
    }
}
