use std::sync::Arc;

use clap::Parser;
use service_monitoring::broadcast::Hub;
use service_monitoring::checkers::PluginRegistry;
use service_monitoring::config::{EngineSettings, EnvConfig};
use service_monitoring::notify::config::{NotificationConfigManager, SecretOverrides};
use service_monitoring::notify::Dispatcher;
use service_monitoring::storage::{MonitorStore, SqliteStore};
use service_monitoring::{ws, Engine};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Override the database URL from the environment
    #[arg(short, long)]
    database_url: Option<String>,

    /// Override the fallback services file
    #[arg(short, long)]
    services_file: Option<String>,
}

fn init_tracing() {
    let filter = filter::Targets::new().with_targets(vec![
        ("service_monitoring", LevelFilter::DEBUG),
        ("monitor", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut env = EnvConfig::load()?;
    if let Some(database_url) = args.database_url {
        env.database_url = database_url;
    }
    if let Some(services_file) = args.services_file {
        env.services_file = services_file;
    }

    let store: Arc<dyn MonitorStore> = Arc::new(SqliteStore::connect(&env.database_url).await?);
    let hub = Arc::new(Hub::new());

    let configs = Arc::new(NotificationConfigManager::new(
        store.clone(),
        SecretOverrides::from(&env),
    ));
    if let Err(e) = configs.reload().await {
        // Platforms may be provisioned later; alerts degrade to the
        // notifier topic until then.
        error!("notification platform configuration unavailable at startup: {e:#}");
    }

    let dispatcher = Arc::new(Dispatcher::new(configs, hub.clone()));
    let registry = PluginRegistry::builtin(store.clone());

    let engine = Engine::new(
        store,
        registry,
        dispatcher,
        hub.clone(),
        EngineSettings::default(),
        env.services_file.clone(),
    );

    engine.start().await?;
    let ws_addr = ws::serve(hub, env.ws_port, engine.shutdown_signal()).await?;
    info!("live streams available on ws://{ws_addr}/ws/notifier and /ws/dashboard");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!("unable to listen for shutdown signal: {e}"),
    }

    engine.stop().await;
    info!("shutdown complete");

    Ok(())
}
