//! Service-availability and resource monitoring engine.
//!
//! The core pieces, wired together by [`engine::Engine`]:
//!
//! - **Inventory & scheduler**: cron-driven ticks per service, one in-flight
//!   check per service at most.
//! - **Checker pipeline**: a default TCP probe plus named plugins, merged
//!   worst-flag-wins.
//! - **Status store & failure state machine**: concurrency-safe latest
//!   results, escalation tiers, alert gating with throttling.
//! - **Alert processor & dispatcher**: recipient resolution and
//!   platform fan-out (email batches, per-user Slack).
//! - **Broadcast hub**: notifier and dashboard topics for live subscribers.

pub mod alerts;
pub mod broadcast;
pub mod checkers;
pub mod config;
pub mod engine;
pub mod inventory;
pub mod model;
pub mod notify;
pub mod recipients;
pub mod scheduler;
pub mod shutdown;
pub mod status;
pub mod storage;
pub mod ws;

pub use engine::Engine;
pub use model::{
    AlertEvent, AlertSeverity, DeviceKind, HealthFlag, HealthReport, MonitoringResult, Recipient,
    RecipientBundle, ServiceDefinition,
};
