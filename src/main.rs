use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chromad::config::Config;
use chromad::hardware::HardwareStore;
use chromad::manager::DeviceManager;
use chromad::prefs::PreferenceStore;
use chromad::registry::DeviceRegistry;

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chromad={}", config.log_level.as_filter())));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // cooperative single-threaded loop; blocking I/O runs on the pool
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        config_dir = %config.config_dir.display(),
        dev_mode = config.dev_mode,
        "chromad starting"
    );

    let store = Arc::new(HardwareStore::builtin());
    let registry = Arc::new(DeviceRegistry::new());
    let prefs = Arc::new(PreferenceStore::new(config.config_dir.clone()));

    let manager = DeviceManager::new(store, registry.clone(), prefs);

    tokio::select! {
        result = manager.run() => result.context("device manager exited")?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            for id in registry.list_devices() {
                if let Some(handle) = registry.get(&id) {
                    let _ = handle.stop_animation().await;
                }
            }
        }
    }

    Ok(())
}
