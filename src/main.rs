use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use uc_intg_cambridge_audio::{
    ApiServer, CambridgeConfig, DeviceState, DriverSettings, IntegrationRuntime, Result,
    StreamMagicConnector,
};

const DRIVER_METADATA: &str = include_str!("../driver.json");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Cambridge Audio Integration Driver");

    let settings = DriverSettings::from_env()?;
    let metadata: serde_json::Value = serde_json::from_str(DRIVER_METADATA)?;

    let config = CambridgeConfig::load(settings.config_file())?;
    let configured = config.is_configured();
    if configured {
        tracing::info!("Configuration summary: {}", config.summary());
    }

    let runtime = Arc::new(IntegrationRuntime::new(
        config.into_shared(),
        Arc::new(StreamMagicConnector::new()),
    ));

    if configured {
        tracing::info!("Pre-configuring entities before Remote connection");
        runtime.initialize().await;
    } else {
        tracing::info!("Device not configured, waiting for setup...");
        runtime.store().set_device_state(DeviceState::Disconnected);
    }

    let listener = TcpListener::bind(settings.listen_address()).await?;
    let server = Arc::new(ApiServer::new(runtime.clone(), metadata));
    let serve = tokio::spawn(server.serve(listener));

    tracing::info!("Cambridge Audio integration driver started successfully");

    tokio::select! {
        result = serve => match result {
            Ok(Err(e)) => tracing::error!("Integration API stopped: {}", e),
            Ok(Ok(())) => {}
            Err(e) => tracing::error!("Integration API task failed: {}", e),
        },
        _ = tokio::signal::ctrl_c() => tracing::info!("Integration stopped by user"),
    }

    runtime.shutdown().await;
    Ok(())
}
