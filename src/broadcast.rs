//! Broadcast hub: two independent pub/sub topics (notifier, dashboard) with
//! bounded per-subscriber buffers, a periodic dashboard snapshot loop, and
//! management control messages for device groups.
//!
//! Slow subscribers are dropped: one failed non-blocking enqueue removes the
//! subscriber and closes its channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::model::{AlertEvent, ServiceDefinition};
use crate::shutdown::Shutdown;
use crate::status::StatusStore;

/// Per-subscriber send buffer capacity.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// Cadence of the periodic dashboard snapshot broadcast.
pub const SNAPSHOT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

pub type SubscriberId = u64;

struct Topic {
    subscribers: DashMap<SubscriberId, mpsc::Sender<Vec<u8>>>,
    next_id: AtomicU64,
}

impl Topic {
    fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.remove(&id);
    }

    /// Deliver to every subscriber with a single non-blocking attempt each.
    /// Returns the number of subscribers dropped for being full or closed.
    fn publish(&self, message: &[u8]) -> usize {
        let mut dropped = Vec::new();

        for entry in self.subscribers.iter() {
            if entry.value().try_send(message.to_vec()).is_err() {
                dropped.push(*entry.key());
            }
        }

        for id in &dropped {
            self.subscribers.remove(id);
            warn!(subscriber = id, "removed unresponsive subscriber");
        }

        dropped.len()
    }

    fn len(&self) -> usize {
        self.subscribers.len()
    }
}

/// Operator-defined device group managed over the dashboard socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceGroup {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "deviceIds", default)]
    pub device_ids: Vec<String>,
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Control envelope sent by management clients.
#[derive(Debug, Deserialize)]
struct ManagementEnvelope {
    #[serde(rename = "type")]
    kind: String,
    data: serde_json::Value,
}

/// Read-only source the dashboard snapshot loop pulls from.
#[derive(Clone)]
pub struct SnapshotSource {
    pub inventory: Arc<RwLock<Vec<ServiceDefinition>>>,
    pub status: Arc<StatusStore>,
}

impl SnapshotSource {
    /// Group every service's latest state by device kind.
    pub async fn build(&self) -> serde_json::Value {
        let inventory = self.inventory.read().await;
        let now = Utc::now();

        let mut groups: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
        for service in inventory.iter() {
            let result = self.status.get(&service.name);

            let (flag, last_check, last_up) = match &result {
                Some(result) => (
                    result.report.flag.as_str(),
                    Some(result.last_check_time),
                    result.last_service_up_time,
                ),
                None => ("Unknown", None, None),
            };

            groups.entry(service.device.to_string()).or_default().push(serde_json::json!({
                "SystemMonitorId": service.system_monitor_id,
                "Name": service.name,
                "IPAddress": service.host,
                "Port": service.port,
                "IsMonitored": service.is_monitored,
                "IsServiceIssueAcknowledged": service.is_acknowledged,
                "Device": service.device.as_str(),
                "CurrentHealthCheck": flag,
                "Metadata": {
                    "LastCheckTime": last_check,
                    "LastServiceUptime": last_up,
                    "SnoozeUntil": service.snooze_until,
                    "DownTime": format_downtime(last_up, now),
                },
            }));
        }

        let payload: Vec<serde_json::Value> = groups
            .into_iter()
            .map(|(title, data)| serde_json::json!({"Title": title, "Data": data}))
            .collect();

        serde_json::Value::Array(payload)
    }
}

/// Elapsed downtime rendered for dashboard rows.
pub fn format_downtime(last_up: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match last_up {
        Some(last_up) => {
            let elapsed = now.signed_duration_since(last_up);
            let days = elapsed.num_days();
            let minutes = elapsed.num_minutes() - days * 24 * 60;
            let seconds = elapsed.num_seconds() - elapsed.num_minutes() * 60;
            format!("{days}D {minutes}M {seconds}S")
        }
        None => "_D _M _S".to_string(),
    }
}

pub struct Hub {
    notifier: Topic,
    dashboard: Topic,

    groups: RwLock<HashMap<String, DeviceGroup>>,
    devices: RwLock<HashMap<String, serde_json::Value>>,
    last_dashboard_payload: RwLock<Option<Vec<u8>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            notifier: Topic::new(),
            dashboard: Topic::new(),
            groups: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            last_dashboard_payload: RwLock::new(None),
        }
    }

    pub fn subscribe_notifier(&self) -> (SubscriberId, mpsc::Receiver<Vec<u8>>) {
        info!("new notifier subscriber");
        self.notifier.subscribe()
    }

    pub fn subscribe_dashboard(&self) -> (SubscriberId, mpsc::Receiver<Vec<u8>>) {
        info!("new dashboard subscriber");
        self.dashboard.subscribe()
    }

    pub fn unsubscribe_notifier(&self, id: SubscriberId) {
        self.notifier.unsubscribe(id);
    }

    pub fn unsubscribe_dashboard(&self, id: SubscriberId) {
        self.dashboard.unsubscribe(id);
    }

    pub fn notifier_count(&self) -> usize {
        self.notifier.len()
    }

    pub fn dashboard_count(&self) -> usize {
        self.dashboard.len()
    }

    /// Push one alert event to every notifier subscriber.
    pub fn publish_alert(&self, event: &AlertEvent) {
        match serde_json::to_vec(event) {
            Ok(payload) => {
                let dropped = self.notifier.publish(&payload);
                debug!(service = %event.service_name, dropped, "alert broadcast to notifier topic");
            }
            Err(e) => warn!("failed to encode alert event: {e}"),
        }
    }

    pub async fn publish_dashboard(&self, payload: Vec<u8>) {
        *self.last_dashboard_payload.write().await = Some(payload.clone());
        self.dashboard.publish(&payload);
    }

    /// Most recent snapshot, delivered to newly connected dashboard clients.
    pub async fn last_dashboard_payload(&self) -> Option<Vec<u8>> {
        self.last_dashboard_payload.read().await.clone()
    }

    /// Initial payloads for a newly connected management client: current
    /// groups followed by current devices.
    pub async fn initial_management_payloads(&self) -> Vec<Vec<u8>> {
        let groups: Vec<DeviceGroup> = self.groups.read().await.values().cloned().collect();
        let devices: Vec<serde_json::Value> = self.devices.read().await.values().cloned().collect();

        let mut payloads = Vec::with_capacity(2);
        if let Ok(body) = serde_json::to_vec(&serde_json::json!({"type": "initialGroups", "data": groups})) {
            payloads.push(body);
        }
        if let Ok(body) = serde_json::to_vec(&serde_json::json!({"type": "initialDevices", "data": devices})) {
            payloads.push(body);
        }
        payloads
    }

    /// Handle a `{type, data}` control message from a management client.
    #[instrument(skip(self, message))]
    pub async fn handle_management_message(&self, message: &[u8]) {
        let envelope: ManagementEnvelope = match serde_json::from_slice(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("invalid management message: {e}");
                return;
            }
        };

        match envelope.kind.as_str() {
            "createGroup" => {
                let Ok(mut group) = serde_json::from_value::<DeviceGroup>(envelope.data) else {
                    warn!("invalid createGroup payload");
                    return;
                };
                group.id = format!("group-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
                group.created_at = Utc::now();
                group.updated_at = Utc::now();

                self.groups.write().await.insert(group.id.clone(), group.clone());
                self.broadcast_control("groupCreated", serde_json::json!(group));
            }
            "updateGroup" => {
                let Ok(mut group) = serde_json::from_value::<DeviceGroup>(envelope.data) else {
                    warn!("invalid updateGroup payload");
                    return;
                };

                let mut groups = self.groups.write().await;
                if groups.contains_key(&group.id) {
                    group.updated_at = Utc::now();
                    groups.insert(group.id.clone(), group.clone());
                    drop(groups);
                    self.broadcast_control("groupUpdated", serde_json::json!(group));
                }
            }
            "deleteGroup" => {
                let Ok(group_id) = serde_json::from_value::<String>(envelope.data) else {
                    warn!("invalid deleteGroup payload");
                    return;
                };

                if self.groups.write().await.remove(&group_id).is_some() {
                    self.broadcast_control("groupDeleted", serde_json::json!(group_id));
                }
            }
            "updateDevice" => {
                let Some(device_id) = envelope
                    .data
                    .get("SystemMonitorId")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                else {
                    warn!("updateDevice payload missing SystemMonitorId");
                    return;
                };

                self.devices.write().await.insert(device_id, envelope.data.clone());
                self.broadcast_control("deviceUpdate", envelope.data);
            }
            other => warn!(kind = other, "unknown management message type"),
        }
    }

    fn broadcast_control(&self, kind: &str, data: serde_json::Value) {
        if let Ok(payload) = serde_json::to_vec(&serde_json::json!({"type": kind, "data": data})) {
            self.dashboard.publish(&payload);
        }
    }

    /// Periodic snapshot loop; runs until shutdown. Exits after closing is
    /// implicit: dropped topic senders close subscriber channels.
    pub async fn run_dashboard_loop(
        self: Arc<Self>,
        source: SnapshotSource,
        interval: std::time::Duration,
        shutdown: Shutdown,
    ) {
        info!("dashboard snapshot loop started");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = source.build().await;
                    match serde_json::to_vec(&snapshot) {
                        Ok(payload) => self.publish_dashboard(payload).await,
                        Err(e) => warn!("failed to encode dashboard snapshot: {e}"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        info!("dashboard snapshot loop stopped");
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
