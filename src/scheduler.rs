//! Cron-driven scheduling: one task per service, strict 5-field expressions,
//! and a skip-if-still-running guard keyed by service name.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::shutdown::Shutdown;

/// Parse a cron expression, falling back to `default_expr` when the input is
/// empty or invalid.
///
/// Only the standard 5-field dialect is accepted. Extensions (a seconds
/// field, `@hourly`-style descriptors) are rejected as invalid so the
/// scheduling contract stays identical across deployments.
pub fn parse_interval(expr: &str, default_expr: &str) -> Schedule {
    if let Some(schedule) = parse_strict(expr) {
        return schedule;
    }

    if !expr.trim().is_empty() {
        warn!(expr, "invalid check interval, using default {default_expr:?}");
    }

    parse_strict(default_expr).expect("default cron expression must be valid")
}

fn parse_strict(expr: &str) -> Option<Schedule> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }
    if fields.iter().any(|f| f.starts_with('@')) {
        return None;
    }

    // The cron crate wants a seconds field; pin it to zero.
    Schedule::from_str(&format!("0 {}", fields.join(" "))).ok()
}

/// Per-service run guards. A tick that finds its guard taken is skipped —
/// never queued — so a service has at most one in-flight check at any
/// instant.
#[derive(Default)]
pub struct RunGuards {
    guards: DashMap<String, Arc<Mutex<()>>>,
}

impl RunGuards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_service(&self, name: &str) -> Arc<Mutex<()>> {
        self.guards
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Spawns and tracks one scheduling task per service.
pub struct Scheduler {
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { handles: Vec::new() }
    }

    /// Schedule `tick` on `schedule` until shutdown. Occurrences that come
    /// due while a previous tick is still running are skipped (the next
    /// occurrence is computed only after the tick completes).
    pub fn schedule<F, Fut>(&mut self, name: String, schedule: Schedule, shutdown: Shutdown, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            debug!(service = %task_name, "schedule task started");

            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    warn!(service = %task_name, "cron schedule has no upcoming occurrence");
                    break;
                };

                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.cancelled() => break,
                }

                if shutdown.is_cancelled() {
                    break;
                }

                tick().await;
            }

            debug!(service = %task_name, "schedule task stopped");
        });

        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every scheduling task (and therefore every in-flight tick)
    /// to finish, up to `ceiling`. Returns false when the ceiling was hit;
    /// remaining tasks are aborted.
    pub async fn stop(&mut self, ceiling: Duration) -> bool {
        let handles = std::mem::take(&mut self.handles);
        let names: Vec<String> = handles.iter().map(|(n, _)| n.clone()).collect();
        let joins = futures::future::join_all(handles.into_iter().map(|(_, h)| h));

        match tokio::time::timeout(ceiling, joins).await {
            Ok(_) => {
                info!("all scheduled tasks completed");
                true
            }
            Err(_) => {
                warn!(services = ?names, "shutdown timed out waiting for in-flight ticks");
                false
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
