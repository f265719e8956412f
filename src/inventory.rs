//! Service inventory loading: database primary, `services.json` fallback.
//!
//! Malformed rows degrade a single service (logged and skipped); only a
//! failure of both sources fails engine start.

use std::collections::HashSet;

use tracing::{info, instrument, warn};

use crate::config::read_services_file;
use crate::model::{DeviceKind, ServiceDefinition};
use crate::storage::schema::ServiceRow;
use crate::storage::MonitorStore;

/// Decode one stored row into a definition. Errors name the offending field.
pub fn decode_row(row: ServiceRow) -> anyhow::Result<ServiceDefinition> {
    let system_monitor_id = row
        .system_monitor_id
        .parse()
        .map_err(|e| anyhow::anyhow!("service {:?}: invalid monitor id: {e}", row.name))?;

    let device = DeviceKind::parse(&row.device)
        .ok_or_else(|| anyhow::anyhow!("service {:?}: unknown device {:?}", row.name, row.device))?;

    let configuration = if row.configuration_json.trim().is_empty() {
        serde_json::Map::new()
    } else {
        serde_json::from_str(&row.configuration_json)
            .map_err(|e| anyhow::anyhow!("service {:?}: invalid configuration JSON: {e}", row.name))?
    };

    let plugins: Vec<String> = if row.plugins_json.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&row.plugins_json)
            .map_err(|e| anyhow::anyhow!("service {:?}: invalid plugins column: {e}", row.name))?
    };

    Ok(ServiceDefinition {
        system_monitor_id,
        name: row.name,
        host: row.host,
        port: u16::try_from(row.port).unwrap_or(0),
        device,
        is_monitored: row.is_monitored,
        is_acknowledged: row.is_acknowledged,
        snooze_until: row.snooze_until,
        check_interval: row.check_interval,
        plugins,
        agent_api_base_url: row.agent_api_base_url,
        configuration,
    })
}

/// Load the inventory from the store, falling back to the services file when
/// the primary source errors. Both failing is fatal to the caller.
#[instrument(skip(store))]
pub async fn load_inventory(
    store: &dyn MonitorStore,
    services_file: &str,
) -> anyhow::Result<Vec<ServiceDefinition>> {
    let definitions = match store.load_services().await {
        Ok(rows) => {
            let mut definitions = Vec::with_capacity(rows.len());
            for row in rows {
                match decode_row(row) {
                    Ok(def) => definitions.push(def),
                    Err(e) => warn!("skipping malformed service row: {e:#}"),
                }
            }
            definitions
        }
        Err(e) => {
            warn!("primary inventory source failed ({e}), falling back to {services_file:?}");
            read_services_file(services_file).map_err(|file_err| {
                anyhow::anyhow!("inventory load failed: database ({e}); file ({file_err})")
            })?
        }
    };

    let definitions = dedupe_by_name(definitions);
    info!("loaded {} monitored services", definitions.len());
    Ok(definitions)
}

/// Service names are unique; on conflict the first definition wins.
fn dedupe_by_name(definitions: Vec<ServiceDefinition>) -> Vec<ServiceDefinition> {
    let mut seen = HashSet::new();
    definitions
        .into_iter()
        .filter(|def| {
            if seen.insert(def.name.clone()) {
                true
            } else {
                warn!(service = %def.name, "duplicate service name in inventory, keeping first");
                false
            }
        })
        .collect()
}
