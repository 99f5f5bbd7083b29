use std::str::FromStr;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use galaxy_bridge::config::{config_path, ensure_default_config};
use galaxy_bridge::entities::Entity;
use galaxy_bridge::mqtt::Coordinator;
use galaxy_bridge::platform::GalaxyPlatform;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = config_path();
    info!("Loading configuration from {}", path.display());
    let config = ensure_default_config(&path).await?;

    let cancel = CancellationToken::new();
    let (coordinator, consumer, io_handle) = Coordinator::spawn();
    let consumer_handle = tokio::spawn(consumer.run(cancel.clone()));

    let mut connection = coordinator.watch_state();
    let connection_logger = tokio::spawn(async move {
        while connection.changed().await.is_ok() {
            info!("MQTT connection state: {:?}", *connection.borrow_and_update());
        }
    });

    coordinator.connect(config.broker.clone());

    let platform = tokio::select! {
        platform = GalaxyPlatform::setup(coordinator.clone(), &config, &cancel) => platform,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted during setup");
            coordinator.shutdown().await;
            cancel.cancel();
            return Ok(());
        }
    };

    for entity in platform.entities() {
        spawn_state_logger(entity.clone(), cancel.clone());
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutting down");

    platform.unload();
    coordinator.shutdown().await;
    cancel.cancel();

    let _ = io_handle.await;
    let _ = consumer_handle.await;
    connection_logger.abort();
    Ok(())
}

fn spawn_state_logger(entity: Arc<dyn Entity>, cancel: CancellationToken) {
    let mut state = entity.watch();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = state.borrow_and_update().clone();
                    info!("{} -> {}", entity.info().name, current);
                }
            }
        }
        debug!("State logger for {} stopped", entity.info().unique_id);
    });
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| Level::from_str(&level).ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
