//! Engine orchestrator: wires inventory load, scheduling, the check
//! pipeline, the status store, and alert emission.
//!
//! One tick = one pass of `check_service` for a single service. Ticks for
//! the same service never overlap (run guard); ticks across services run
//! concurrently on the scheduler's tasks.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::alerts::AlertProcessor;
use crate::broadcast::{Hub, SnapshotSource, SNAPSHOT_INTERVAL};
use crate::checkers::PluginRegistry;
use crate::config::EngineSettings;
use crate::inventory::load_inventory;
use crate::model::{
    merge_reports, AlertEvent, AlertSeverity, HealthFlag, HealthReport, MonitoringResult,
    ServiceDefinition,
};
use crate::notify::Dispatcher;
use crate::scheduler::{parse_interval, RunGuards, Scheduler};
use crate::shutdown::{Shutdown, ShutdownController};
use crate::status::StatusStore;
use crate::storage::schema::{CurrentStatusRow, HistoryRow, PluginResultRow};
use crate::storage::MonitorStore;

pub struct Engine {
    store: Arc<dyn MonitorStore>,
    registry: PluginRegistry,
    status: Arc<StatusStore>,
    inventory: Arc<RwLock<Vec<ServiceDefinition>>>,
    hub: Arc<Hub>,
    guards: RunGuards,
    settings: EngineSettings,
    services_file: String,

    alert_tx: std::sync::Mutex<Option<mpsc::Sender<AlertEvent>>>,
    alert_rx: std::sync::Mutex<Option<mpsc::Receiver<AlertEvent>>>,
    processor: std::sync::Mutex<Option<JoinHandle<()>>>,
    dispatcher: Arc<Dispatcher>,

    controller: ShutdownController,
    shutdown: Shutdown,
    scheduler: Mutex<Scheduler>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        registry: PluginRegistry,
        dispatcher: Arc<Dispatcher>,
        hub: Arc<Hub>,
        settings: EngineSettings,
        services_file: String,
    ) -> Arc<Self> {
        let (controller, shutdown) = ShutdownController::new();
        let (alert_tx, alert_rx) = mpsc::channel(settings.alert_buffer_size);

        Arc::new(Self {
            store,
            registry,
            status: Arc::new(StatusStore::new()),
            inventory: Arc::new(RwLock::new(Vec::new())),
            hub,
            guards: RunGuards::new(),
            settings,
            services_file,
            alert_tx: std::sync::Mutex::new(Some(alert_tx)),
            alert_rx: std::sync::Mutex::new(Some(alert_rx)),
            processor: std::sync::Mutex::new(None),
            dispatcher,
            controller,
            shutdown,
            scheduler: Mutex::new(Scheduler::new()),
        })
    }

    pub fn status(&self) -> &Arc<StatusStore> {
        &self.status
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn snapshot_source(&self) -> SnapshotSource {
        SnapshotSource {
            inventory: self.inventory.clone(),
            status: self.status.clone(),
        }
    }

    /// Validate one definition's plugin references and run their
    /// initializers, recording misconfigurations. Returns the number of
    /// plugin-reference errors. `start` applies this to the whole
    /// inventory.
    pub async fn initialize_service(&self, def: &ServiceDefinition) -> usize {
        self.registry
            .initialize_service(def, self.settings.max_plugins_per_service)
            .await
    }

    /// The consuming end of the bounded alert channel. Taken exactly once:
    /// by `start` for the alert processor, or by a test that drains the
    /// channel itself.
    pub fn take_alert_receiver(&self) -> Option<mpsc::Receiver<AlertEvent>> {
        self.alert_rx
            .lock()
            .expect("alert receiver mutex poisoned")
            .take()
    }

    /// Load the inventory, initialize plugins, schedule every monitored
    /// service, and start the alert processor and the dashboard snapshot
    /// loop. Fails fast only when no plugins are usable *and* at least one
    /// plugin reference was broken.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let definitions = load_inventory(self.store.as_ref(), &self.services_file).await?;

        let mut reference_errors = 0;
        for def in &definitions {
            reference_errors += self.initialize_service(def).await;
        }

        if self.registry.is_empty() && reference_errors > 0 {
            anyhow::bail!(
                "no checker plugins loaded and {reference_errors} plugin references failed"
            );
        }
        if reference_errors > 0 {
            warn!("{reference_errors} plugin reference errors, continuing with degraded set");
        }

        *self.inventory.write().await = definitions.clone();

        let mut scheduler = self.scheduler.lock().await;
        for def in definitions.into_iter().filter(|d| d.is_monitored) {
            let schedule = parse_interval(&def.check_interval, &self.settings.default_interval);
            let engine = Arc::clone(self);
            let name = def.name.clone();

            scheduler.schedule(name, schedule, self.shutdown.clone(), move || {
                let engine = Arc::clone(&engine);
                let def = def.clone();
                async move {
                    engine.check_service(&def).await;
                }
            });
        }
        info!("scheduled {} services", scheduler.len());
        drop(scheduler);

        let alert_rx = self
            .take_alert_receiver()
            .ok_or_else(|| anyhow::anyhow!("engine already started"))?;
        let processor =
            AlertProcessor::new(self.store.clone(), self.dispatcher.clone()).spawn(alert_rx);
        *self.processor.lock().expect("processor mutex poisoned") = Some(processor);

        tokio::spawn(Arc::clone(&self.hub).run_dashboard_loop(
            self.snapshot_source(),
            SNAPSHOT_INTERVAL,
            self.shutdown.clone(),
        ));

        info!("monitoring engine started");
        Ok(())
    }

    /// Trip the shared cancellation signal, wait for in-flight ticks (15 s
    /// ceiling), close the alert channel, and clean up plugins.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        info!("stopping monitoring engine");
        self.controller.trip();

        self.scheduler
            .lock()
            .await
            .stop(self.settings.graceful_stop)
            .await;

        // Dropping the last sender closes the channel and stops the
        // processor once the queue drains.
        drop(self.alert_tx.lock().expect("alert sender mutex poisoned").take());
        let processor = self.processor.lock().expect("processor mutex poisoned").take();
        if let Some(processor) = processor {
            if tokio::time::timeout(self.settings.graceful_stop, processor)
                .await
                .is_err()
            {
                warn!("alert processor did not drain within the stop ceiling");
            }
        }

        self.registry.cleanup_all().await;

        if let Err(e) = self.store.close().await {
            warn!("store close failed: {e}");
        }

        info!("monitoring engine stopped");
    }

    /// The scheduler's unit of work for one service. Exposed so tests can
    /// drive ticks directly; production code never calls it outside the
    /// scheduler.
    #[instrument(skip(self, def), fields(service = %def.name))]
    pub async fn check_service(self: &Arc<Self>, def: &ServiceDefinition) {
        if self.shutdown.is_cancelled() {
            return;
        }

        // Skip-if-still-running: a tick that finds the previous one in
        // flight is dropped, never queued.
        let guard = self.guards.for_service(&def.name);
        let Ok(_running) = guard.try_lock() else {
            debug!("previous check still running, skipping tick");
            return;
        };

        let now = Utc::now();
        if def.is_snoozed(now) {
            debug!("service snoozed, skipping check");
            return;
        }

        let (merged, plugin_results) = match self.registry.misconfiguration(&def.name) {
            Some(reason) => {
                // Misconfigured at load: surface through normal channels
                // without touching the network.
                (HealthReport::new(HealthFlag::InvalidConfiguration, reason), Vec::new())
            }
            None => self.run_pipeline(def).await,
        };

        let next = self.status.next_result(def, merged, now);

        if let Err(e) = self.persist_tick(def, &next, &plugin_results).await {
            // Rollback happened; the previous status persists.
            error!("tick persistence failed, keeping previous status: {e}");
            return;
        }

        self.status.commit(def, next.clone());
        self.maybe_emit_alert(def, &next, now);
    }

    /// Default probe first; plugins only when the probe passes. Merge takes
    /// the worst flag across everything that ran.
    async fn run_pipeline(
        &self,
        def: &ServiceDefinition,
    ) -> (HealthReport, Vec<MonitoringResult>) {
        let default_report = self
            .run_checker(self.registry.default_probe().as_ref(), def)
            .await
            .report;

        if !default_report.flag.is_healthy() {
            debug!(flag = %default_report.flag, "default probe failed, skipping plugins");
            return (default_report, Vec::new());
        }

        let mut plugin_results = Vec::with_capacity(def.plugins.len());
        for plugin_name in &def.plugins {
            let Some(plugin) = self.registry.get(plugin_name) else {
                warn!(plugin = %plugin_name, "plugin disappeared from registry");
                continue;
            };
            if !plugin.supports(def.device) {
                warn!(plugin = %plugin_name, "plugin does not support device, skipping");
                continue;
            }

            plugin_results.push(self.run_checker(plugin.as_ref(), def).await);
        }

        let reports: Vec<&HealthReport> = plugin_results.iter().map(|r| &r.report).collect();
        (merge_reports(&default_report, &reports), plugin_results)
    }

    /// Run one checker under the engine's outer ceiling, translating errors
    /// and timeouts into flags. Errors never reach the scheduler.
    async fn run_checker(
        &self,
        checker: &dyn crate::checkers::Checker,
        def: &ServiceDefinition,
    ) -> MonitoringResult {
        let outcome = tokio::time::timeout(
            self.settings.plugin_check_ceiling,
            checker.check(&self.shutdown, def),
        )
        .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(checker = checker.name(), "checker failed: {e:#}");
                MonitoringResult::new(
                    def.system_monitor_id,
                    checker.name(),
                    HealthReport::new(HealthFlag::Degraded, format!("checker failed: {e}")),
                )
            }
            Err(_) => {
                warn!(checker = checker.name(), "checker exceeded the outer ceiling");
                MonitoringResult::new(
                    def.system_monitor_id,
                    checker.name(),
                    HealthReport::new(HealthFlag::Degraded, "checker timed out"),
                )
            }
        }
    }

    /// History row, per-plugin rows, and the current-state update in one
    /// transaction.
    async fn persist_tick(
        &self,
        def: &ServiceDefinition,
        merged: &MonitoringResult,
        plugin_results: &[MonitoringResult],
    ) -> crate::storage::StorageResult<()> {
        let history = HistoryRow {
            history_id: Uuid::new_v4(),
            system_monitor_id: def.system_monitor_id,
            service_name: def.name.clone(),
            flag: merged.report.flag,
            description: merged.report.description.clone(),
            failure_count: merged.failure_count,
            checked_at: merged.last_check_time,
        };

        let plugin_rows: Vec<PluginResultRow> = plugin_results
            .iter()
            .map(|result| PluginResultRow {
                history_id: history.history_id,
                plugin_id: result.plugin_id.clone(),
                flag: result.report.flag,
                description: result.report.description.clone(),
                checked_at: result.last_check_time,
            })
            .collect();

        let current = CurrentStatusRow::from_result(def, merged);

        self.store.record_tick(&history, &plugin_rows, &current).await
    }

    /// Emission gate plus back-pressure handling for the bounded channel.
    /// A full channel drops the event without touching the alert cache so
    /// the next tick retries.
    fn maybe_emit_alert(&self, def: &ServiceDefinition, result: &MonitoringResult, now: chrono::DateTime<Utc>) {
        if !self.status.should_emit_alert(def, result, &self.settings, now) {
            return;
        }

        let severity = if result.report.flag == HealthFlag::Degraded {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        };

        let event = AlertEvent {
            system_monitor_id: def.system_monitor_id,
            service_name: def.name.clone(),
            device: def.device,
            message: format!(
                "{} ({} consecutive failures)",
                result.report.description, result.failure_count
            ),
            severity,
            timestamp: now,
            agent_api_base_url: def.agent_api_base_url.clone(),
        };

        let sender = self
            .alert_tx
            .lock()
            .expect("alert sender mutex poisoned")
            .clone();
        let Some(sender) = sender else {
            warn!("alert channel already closed, dropping event");
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {
                self.status.record_alert(&def.name, now);
                info!(service = %def.name, "alert emitted");
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                error!(service = %def.name, "alert channel full, dropping event (will retry next tick)");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(service = %def.name, "alert channel closed, dropping event");
            }
        }
    }
}
