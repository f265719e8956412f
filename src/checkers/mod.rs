//! Pluggable checker pipeline: the capability trait every checker satisfies,
//! plus the registry that owns the closed family of implementations.
//!
//! The engine depends only on [`Checker`]; concrete plugins are selected per
//! service through the inventory's `plugins` list and validated against the
//! service's device kind at load time.

pub mod agent;
pub mod docker;
pub mod health;
pub mod http;
pub mod server;
pub mod snmp;
pub mod tls;
pub mod web;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::model::{DeviceKind, MonitoringResult, ServiceDefinition};
use crate::shutdown::Shutdown;
use crate::storage::MonitorStore;

/// Configuration mapping handed to a checker at initialization. Schema is
/// owned by the plugin; the core never inspects unknown keys.
pub type CheckerConfig = serde_json::Map<String, serde_json::Value>;

/// Capability set implemented by the default probe and every plugin.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Device kinds this checker may run against. The engine refuses to run
    /// a plugin whose supported set omits the service's device.
    fn supported_devices(&self) -> &'static [DeviceKind];

    fn supports(&self, device: DeviceKind) -> bool {
        self.supported_devices().contains(&device)
    }

    /// Called once per referencing service at inventory load. Idempotent.
    /// A failure marks the service misconfigured; its checks emit
    /// InvalidConfiguration without touching the network.
    async fn initialize(&self, configuration: &CheckerConfig) -> anyhow::Result<()>;

    /// Single-shot check. Never invoked concurrently for the same service.
    /// Expected outcomes are encoded in the returned report's flag; `Err` is
    /// reserved for infrastructure failures and is translated by the engine,
    /// never propagated to the scheduler.
    async fn check(
        &self,
        shutdown: &Shutdown,
        service: &ServiceDefinition,
    ) -> anyhow::Result<MonitoringResult>;

    /// Called on shutdown; releases persistent resources. Errors are logged,
    /// not fatal.
    async fn cleanup(&self) -> anyhow::Result<()>;
}

/// Registry owning the loaded plugins and the always-first default probe.
pub struct PluginRegistry {
    default_probe: Arc<dyn Checker>,
    plugins: HashMap<String, Arc<dyn Checker>>,

    /// Services whose plugin references or initialization failed at load;
    /// their ticks emit InvalidConfiguration without running checks.
    misconfigured: DashMap<String, String>,
}

impl PluginRegistry {
    pub fn new(default_probe: Arc<dyn Checker>) -> Self {
        Self {
            default_probe,
            plugins: HashMap::new(),
            misconfigured: DashMap::new(),
        }
    }

    /// The full built-in checker family wired against `store`.
    pub fn builtin(store: Arc<dyn MonitorStore>) -> Self {
        let mut registry = Self::new(Arc::new(health::HealthCheck::new()));

        registry.register(Arc::new(http::HttpMonitorPlugin::new()));
        registry.register(Arc::new(tls::SslCheckPlugin::new()));
        registry.register(Arc::new(web::WebModulePlugin::new()));
        registry.register(Arc::new(agent::AgentMonitorPlugin::new(store.clone())));
        registry.register(Arc::new(snmp::NetworkSnmpPlugin::new(store.clone())));
        registry.register(Arc::new(server::ServerResourcePlugin::new(store.clone())));
        registry.register(Arc::new(docker::DockerMonitorPlugin::new()));

        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn Checker>) {
        info!(plugin = plugin.name(), "registered checker plugin");
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn default_probe(&self) -> &Arc<dyn Checker> {
        &self.default_probe
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Checker>> {
        self.plugins.get(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Validate `service`'s plugin references and run their initializers.
    /// Returns the number of plugin-reference errors (unknown name or
    /// unsupported device). Any failure records the service as
    /// misconfigured; it is still scheduled so operators see the error
    /// through normal channels.
    pub async fn initialize_service(&self, service: &ServiceDefinition, max_plugins: usize) -> usize {
        let mut reference_errors = 0;

        if service.plugins.len() > max_plugins {
            self.misconfigured.insert(
                service.name.clone(),
                format!("{} plugins configured, limit is {max_plugins}", service.plugins.len()),
            );
            warn!(service = %service.name, "plugin list exceeds the per-service limit");
            return reference_errors;
        }

        for plugin_name in &service.plugins {
            let Some(plugin) = self.get(plugin_name) else {
                reference_errors += 1;
                self.misconfigured.insert(
                    service.name.clone(),
                    format!("unknown plugin {plugin_name:?}"),
                );
                warn!(service = %service.name, plugin = %plugin_name, "unknown plugin reference");
                continue;
            };

            if !plugin.supports(service.device) {
                reference_errors += 1;
                self.misconfigured.insert(
                    service.name.clone(),
                    format!("plugin {plugin_name:?} does not support device {}", service.device),
                );
                warn!(
                    service = %service.name,
                    plugin = %plugin_name,
                    device = %service.device,
                    "plugin does not support service device"
                );
                continue;
            }

            if let Err(e) = plugin.initialize(&service.configuration).await {
                self.misconfigured
                    .insert(service.name.clone(), format!("{plugin_name}: {e}"));
                warn!(service = %service.name, plugin = %plugin_name, "plugin initialization failed: {e:#}");
            }
        }

        reference_errors
    }

    pub fn misconfiguration(&self, service_name: &str) -> Option<String> {
        self.misconfigured.get(service_name).map(|e| e.clone())
    }

    /// Best-effort cleanup of every plugin and the default probe.
    pub async fn cleanup_all(&self) {
        for (name, plugin) in &self.plugins {
            if let Err(e) = plugin.cleanup().await {
                error!(plugin = %name, "cleanup failed: {e:#}");
            }
        }
        if let Err(e) = self.default_probe.cleanup().await {
            error!("default probe cleanup failed: {e:#}");
        }
    }
}
