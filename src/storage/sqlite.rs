//! SQLite-backed implementation of the `MonitorStore` interface.
//!
//! - **WAL mode** for concurrent reads during tick writes
//! - **Connection pooling** with a 10 s acquire ceiling and 30 s busy timeout
//! - **Migrations** versioned with sqlx under `./migrations`
//!
//! Tick writes (`record_tick`) are one transaction; metric sinks use
//! `ON CONFLICT` upserts matching the MERGE-style shape of the logical
//! operations.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::MonitorStore;
use super::error::{StorageError, StorageResult};
use super::schema::{
    AgentDiskRow, AgentMetricRow, CurrentStatusRow, HistoryRow, NetworkMetricRow, PluginResultRow,
    RecipientRow, ServiceRow,
};

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) and migrate the database at `url`.
    #[instrument(skip_all, fields(url))]
    pub async fn connect(url: &str) -> StorageResult<Self> {
        info!("initializing SQLite store at {url}");

        let options: SqliteConnectOptions = url
            .parse::<SqliteConnectOptions>()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self { pool })
    }

    fn to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }
}

#[async_trait]
impl MonitorStore for SqliteStore {
    #[instrument(skip(self))]
    async fn load_services(&self) -> StorageResult<Vec<ServiceRow>> {
        let rows = sqlx::query(
            r#"
            SELECT system_monitor_id, service_name, host, port, is_monitored,
                   current_health_check, device, failure_count, retry_count,
                   configuration, check_interval, is_acknowledged, snooze_until,
                   plugins, agent_api_base_url
            FROM system_monitor
            WHERE is_monitored = 1
            ORDER BY service_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let services = rows
            .into_iter()
            .map(|row| ServiceRow {
                system_monitor_id: row.get("system_monitor_id"),
                name: row.get("service_name"),
                host: row.get("host"),
                port: row.get("port"),
                is_monitored: row.get::<i64, _>("is_monitored") != 0,
                current_health_check: row.get("current_health_check"),
                device: row.get("device"),
                failure_count: row.get("failure_count"),
                retry_count: row.get("retry_count"),
                configuration_json: row.get("configuration"),
                check_interval: row.get("check_interval"),
                is_acknowledged: row.get::<i64, _>("is_acknowledged") != 0,
                snooze_until: row
                    .get::<Option<i64>, _>("snooze_until")
                    .map(Self::from_millis),
                plugins_json: row.get("plugins"),
                agent_api_base_url: row.get("agent_api_base_url"),
            })
            .collect::<Vec<_>>();

        debug!("loaded {} service rows", services.len());
        Ok(services)
    }

    #[instrument(skip(self))]
    async fn load_notification_platforms(&self) -> StorageResult<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT name, configuration FROM notification_platforms")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("name"), row.get("configuration")))
            .collect())
    }

    #[instrument(skip(self))]
    async fn resolve_recipients(
        &self,
        service_names: &str,
        monitor_ids: &str,
    ) -> StorageResult<Vec<RecipientRow>> {
        // The logical operation takes two comma-joined lists; SQLite has no
        // array parameters, so the lists are matched with instr() against
        // delimited copies.
        let names = format!(",{service_names},");
        let ids = format!(",{monitor_ids},");

        let rows = sqlx::query(
            r#"
            SELECT system_monitor_id, service_name, user_name, email,
                   phone_number, slack_id, group_name, platform
            FROM notification_recipients
            WHERE instr(?1, ',' || service_name || ',') > 0
               OR instr(?2, ',' || system_monitor_id || ',') > 0
            ORDER BY rowid ASC
            "#,
        )
        .bind(&names)
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let raw_id: String = row.get("system_monitor_id");
                let system_monitor_id = raw_id
                    .parse()
                    .map_err(|e| StorageError::DecodeError(format!("recipient monitor id {raw_id:?}: {e}")))?;

                Ok(RecipientRow {
                    system_monitor_id,
                    service_name: row.get("service_name"),
                    user_name: row.get("user_name"),
                    email: row.get("email"),
                    phone_number: row.get("phone_number"),
                    slack_id: row.get("slack_id"),
                    group_name: row.get("group_name"),
                    platform: row.get("platform"),
                })
            })
            .collect()
    }

    #[instrument(skip_all, fields(service = %current.service_name))]
    async fn record_tick(
        &self,
        history: &HistoryRow,
        plugin_results: &[PluginResultRow],
        current: &CurrentStatusRow,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO monitoring_result_history
                (history_id, system_monitor_id, service_name, flag, description,
                 failure_count, checked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(history.history_id.to_string())
        .bind(history.system_monitor_id.to_string())
        .bind(&history.service_name)
        .bind(history.flag.as_str())
        .bind(&history.description)
        .bind(history.failure_count as i64)
        .bind(Self::to_millis(&history.checked_at))
        .execute(&mut *tx)
        .await?;

        for plugin in plugin_results {
            sqlx::query(
                r#"
                INSERT INTO plugin_monitoring_results
                    (history_id, plugin_id, flag, description, checked_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(plugin.history_id.to_string())
            .bind(&plugin.plugin_id)
            .bind(plugin.flag.as_str())
            .bind(&plugin.description)
            .bind(Self::to_millis(&plugin.checked_at))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE system_monitor
            SET current_health_check = ?,
                last_service_up_time = ?,
                last_check_time = ?,
                failure_count = ?
            WHERE service_name = ?
            "#,
        )
        .bind(current.current_health_check.as_str())
        .bind(current.last_service_up_time.as_ref().map(Self::to_millis))
        .bind(Self::to_millis(&current.last_check_time))
        .bind(current.failure_count as i64)
        .bind(&current.service_name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn upsert_agent_metrics(&self, rows: &[AgentMetricRow]) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO agent_metric_data
                    (agent_id, system_monitor_id, sampled_at, cpu_usage, memory_usage)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (agent_id, sampled_at) DO UPDATE SET
                    system_monitor_id = excluded.system_monitor_id,
                    cpu_usage = excluded.cpu_usage,
                    memory_usage = excluded.memory_usage
                "#,
            )
            .bind(&row.agent_id)
            .bind(row.system_monitor_id.to_string())
            .bind(Self::to_millis(&row.sampled_at))
            .bind(row.cpu_usage)
            .bind(row.memory_usage)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("agent metric upsert complete");
        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn upsert_agent_disks(&self, rows: &[AgentDiskRow]) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO agent_disk_data
                    (agent_id, drive, size_bytes, free_bytes, used_bytes, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (agent_id, drive) DO UPDATE SET
                    size_bytes = excluded.size_bytes,
                    free_bytes = excluded.free_bytes,
                    used_bytes = excluded.used_bytes,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&row.agent_id)
            .bind(&row.drive)
            .bind(row.size_bytes)
            .bind(row.free_bytes)
            .bind(row.used_bytes)
            .bind(Self::to_millis(&row.updated_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    #[instrument(skip_all, fields(count = rows.len()))]
    async fn upsert_network_metrics(&self, rows: &[NetworkMetricRow]) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO network_device_metric_data
                    (system_monitor_id, device_ip, metric_name, metric_description,
                     metric_value, last_poll)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (device_ip, metric_name) DO UPDATE SET
                    system_monitor_id = excluded.system_monitor_id,
                    metric_description = excluded.metric_description,
                    metric_value = excluded.metric_value,
                    last_poll = excluded.last_poll
                "#,
            )
            .bind(row.system_monitor_id.to_string())
            .bind(&row.device_ip)
            .bind(&row.metric_name)
            .bind(&row.metric_description)
            .bind(&row.metric_value)
            .bind(Self::to_millis(&row.last_poll))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_agent_metrics(
        &self,
        system_monitor_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<AgentMetricRow>> {
        let rows = sqlx::query(
            r#"
            SELECT agent_id, system_monitor_id, sampled_at, cpu_usage, memory_usage
            FROM agent_metric_data
            WHERE system_monitor_id = ?
            ORDER BY sampled_at DESC
            LIMIT ?
            "#,
        )
        .bind(system_monitor_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let raw_id: String = row.get("system_monitor_id");
                let system_monitor_id = raw_id
                    .parse()
                    .map_err(|e| StorageError::DecodeError(format!("metric monitor id {raw_id:?}: {e}")))?;

                Ok(AgentMetricRow {
                    agent_id: row.get("agent_id"),
                    system_monitor_id,
                    sampled_at: Self::from_millis(row.get("sampled_at")),
                    cpu_usage: row.get("cpu_usage"),
                    memory_usage: row.get("memory_usage"),
                })
            })
            .collect()
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
