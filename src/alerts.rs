//! Alert processor: the single consumer draining the bounded alert channel.
//!
//! Events are handled in FIFO order; for each one the processor resolves
//! recipients and hands the event to the dispatcher. It exits when the
//! channel closes (engine stop).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::model::{recipient_key, AlertEvent};
use crate::notify::Dispatcher;
use crate::recipients::resolve_recipients;
use crate::storage::MonitorStore;

pub struct AlertProcessor {
    store: Arc<dyn MonitorStore>,
    dispatcher: Arc<Dispatcher>,
}

impl AlertProcessor {
    pub fn new(store: Arc<dyn MonitorStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Spawn the processor; it owns the receiving end of the alert channel.
    pub fn spawn(self, rx: mpsc::Receiver<AlertEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: mpsc::Receiver<AlertEvent>) {
        info!("alert processor started");

        while let Some(event) = rx.recv().await {
            self.process(event).await;
        }

        info!("alert channel closed, alert processor exiting");
    }

    #[instrument(skip(self, event), fields(service = %event.service_name))]
    async fn process(&self, event: AlertEvent) {
        let pairs = vec![(event.system_monitor_id, event.service_name.clone())];

        let bundles = match resolve_recipients(self.store.as_ref(), &pairs).await {
            Ok(bundles) => bundles,
            Err(e) => {
                warn!("recipient resolution failed, broadcasting without fan-out: {e}");
                self.dispatcher.dispatch(&event, None).await;
                return;
            }
        };

        let key = recipient_key(&event.system_monitor_id, &event.service_name);
        let delivered = self.dispatcher.dispatch(&event, bundles.get(&key)).await;

        if delivered {
            debug!("alert fan-out complete");
        } else {
            warn!("alert fan-out finished with errors");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Hub;
    use crate::model::{AlertSeverity, DeviceKind};
    use crate::notify::config::{NotificationConfigManager, SecretOverrides};
    use crate::storage::MemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(name: &str) -> AlertEvent {
        AlertEvent {
            system_monitor_id: Uuid::new_v4(),
            service_name: name.to_string(),
            device: DeviceKind::WebModule,
            message: "sustained failures".to_string(),
            severity: AlertSeverity::Warning,
            timestamp: Utc::now(),
            agent_api_base_url: None,
        }
    }

    #[tokio::test]
    async fn test_fifo_drain_and_exit_on_close() {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(Hub::new());
        let configs = Arc::new(NotificationConfigManager::new(
            store.clone(),
            SecretOverrides::default(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(configs, hub.clone()));

        let (_subscriber, mut notifier_rx) = hub.subscribe_notifier();
        let (tx, rx) = mpsc::channel(100);
        let handle = AlertProcessor::new(store, dispatcher).spawn(rx);

        tx.send(event("first")).await.unwrap();
        tx.send(event("second")).await.unwrap();

        let first: serde_json::Value =
            serde_json::from_slice(&notifier_rx.recv().await.unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_slice(&notifier_rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["service_name"], "first");
        assert_eq!(second["service_name"], "second");

        // Closing the channel stops the processor.
        drop(tx);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("processor should exit when the channel closes")
            .unwrap();
    }
}
