//! Recipient resolution: one store call per batch of services, grouped into
//! bundles keyed by the `"{uuid}|{name}"` composite key.

use std::collections::HashMap;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::model::{recipient_key, Recipient, RecipientBundle};
use crate::storage::{MonitorStore, StorageResult};

/// Resolve recipients for the given `(system_monitor_id, service_name)`
/// pairs. Rows are grouped in arrival order, so bundles are deterministic
/// for stable source data. A pair without rows has no map entry.
#[instrument(skip(store, pairs), fields(pairs = pairs.len()))]
pub async fn resolve_recipients(
    store: &dyn MonitorStore,
    pairs: &[(Uuid, String)],
) -> StorageResult<HashMap<String, RecipientBundle>> {
    let service_names: Vec<String> = pairs.iter().map(|(_, name)| name.clone()).collect();
    let monitor_ids: Vec<String> = pairs.iter().map(|(id, _)| id.to_string()).collect();

    let rows = store
        .resolve_recipients(&service_names.join(","), &monitor_ids.join(","))
        .await?;

    let mut bundles: HashMap<String, RecipientBundle> = HashMap::new();
    for row in rows {
        let key = recipient_key(&row.system_monitor_id, &row.service_name);
        bundles.entry(key).or_default().users.push(Recipient {
            user_name: row.user_name,
            email: row.email,
            phone_number: row.phone_number,
            slack_id: row.slack_id,
            group_name: row.group_name,
            platform: row.platform,
        });
    }

    debug!("resolved {} recipient bundles", bundles.len());
    Ok(bundles)
}

/// Group one bundle's users by notification platform, preserving order
/// within each platform.
pub fn group_by_platform(bundle: &RecipientBundle) -> HashMap<String, Vec<&Recipient>> {
    let mut groups: HashMap<String, Vec<&Recipient>> = HashMap::new();
    for user in &bundle.users {
        groups.entry(user.platform.clone()).or_default().push(user);
    }
    groups
}
