//! Status store, alert cache, and the failure state machine.
//!
//! The store holds exactly one merged [`MonitoringResult`] per service
//! (last-value-wins) and one alert timestamp per service. Both maps are
//! concurrency-safe; per-service updates are already serialized by the
//! scheduler's skip-if-running guard.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::config::EngineSettings;
use crate::model::{HealthFlag, HealthReport, MonitoringResult, ServiceDefinition};

#[derive(Default)]
pub struct StatusStore {
    results: DashMap<String, MonitoringResult>,
    alert_cache: DashMap<String, DateTime<Utc>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, service_name: &str) -> Option<MonitoringResult> {
        self.results.get(service_name).map(|entry| entry.clone())
    }

    /// Consistent per-key snapshot of every service's latest result.
    pub fn snapshot(&self) -> Vec<(String, MonitoringResult)> {
        self.results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Advance the failure state machine for a tick's merged report without
    /// storing anything. The caller persists the tick first and commits the
    /// result only when persistence succeeded.
    pub fn next_result(
        &self,
        service: &ServiceDefinition,
        report: HealthReport,
        now: DateTime<Utc>,
    ) -> MonitoringResult {
        let previous = self.results.get(&service.name).map(|e| e.clone());
        let prev_failures = previous.as_ref().map(|r| r.failure_count).unwrap_or(0);
        let prev_up_time = previous.as_ref().and_then(|r| r.last_service_up_time);

        if report.flag.is_healthy() {
            MonitoringResult {
                system_monitor_id: service.system_monitor_id,
                plugin_id: "default".to_string(),
                report,
                last_check_time: now,
                last_service_up_time: Some(now),
                failure_count: 0,
            }
        } else {
            let failure_count = prev_failures + 1;
            MonitoringResult {
                system_monitor_id: service.system_monitor_id,
                plugin_id: "default".to_string(),
                report: reclassify(report, failure_count),
                last_check_time: now,
                last_service_up_time: prev_up_time,
                failure_count,
            }
        }
    }

    /// Store a computed result (last-value-wins). A Healthy result clears
    /// the service's alert-cache entry.
    pub fn commit(&self, service: &ServiceDefinition, result: MonitoringResult) {
        if result.report.flag.is_healthy() {
            self.alert_cache.remove(&service.name);
        }
        self.results.insert(service.name.clone(), result);
    }

    /// Advance and store in one step.
    pub fn apply_merged(
        &self,
        service: &ServiceDefinition,
        report: HealthReport,
        now: DateTime<Utc>,
    ) -> MonitoringResult {
        let result = self.next_result(service, report, now);
        self.commit(service, result.clone());
        result
    }

    /// Gate for alert emission: sustained failure past the threshold, not
    /// acknowledged, an alertable flag, and no alert recorded within the
    /// throttle window.
    pub fn should_emit_alert(
        &self,
        service: &ServiceDefinition,
        result: &MonitoringResult,
        settings: &EngineSettings,
        now: DateTime<Utc>,
    ) -> bool {
        if result.failure_count <= settings.failure_threshold {
            return false;
        }
        if service.is_acknowledged {
            return false;
        }
        if !result.report.flag.is_alertable() {
            return false;
        }

        match self.last_alert(&service.name) {
            Some(last) if now - last < settings.alert_throttle => {
                debug!(service = %service.name, "alert suppressed by throttle window");
                false
            }
            _ => true,
        }
    }

    pub fn last_alert(&self, service_name: &str) -> Option<DateTime<Utc>> {
        self.alert_cache.get(service_name).map(|entry| *entry)
    }

    /// Record a successful alert emission; starts the throttle window.
    pub fn record_alert(&self, service_name: &str, when: DateTime<Utc>) {
        self.alert_cache.insert(service_name.to_string(), when);
    }

    pub fn clear_alert(&self, service_name: &str) {
        self.alert_cache.remove(service_name);
    }
}

/// Re-classify a non-Healthy report based on the consecutive failure count.
///
/// InvalidConfiguration is sticky: it is never promoted into an alertable
/// flag by repetition, only operator remediation clears it.
fn reclassify(report: HealthReport, failure_count: u32) -> HealthReport {
    if report.flag == HealthFlag::InvalidConfiguration {
        return report;
    }

    let flag = match failure_count {
        0 | 1 => report.flag,
        2 | 3 => HealthFlag::Escalation,
        _ => HealthFlag::Degraded,
    };

    if flag == report.flag {
        report
    } else {
        HealthReport::new(flag, report.description)
    }
}
