mod core;
mod error;
#[cfg(test)]
mod fake;
mod http;
mod hub;
mod provider;
mod simulator;
mod sse;

use std::sync::Arc;

use stream_proto::config::Config;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::{CoreEvent, CoreHandle, SessionCore};
use crate::provider::ProviderEvent;
use crate::simulator::SimulatedProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // File log + stderr
    let log_path = stream_proto::platform::log_path("streamd.log");
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stream_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let mut config = Config::load()?;
    config.apply_env_overrides()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Event channel: all external inputs funnel into SessionCore
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(256);
    let (provider_tx, provider_rx) = mpsc::channel::<ProviderEvent>(256);

    let provider = Arc::new(SimulatedProvider::new(config.provider.clone(), provider_tx));
    let session_core = SessionCore::new(provider.clone(), config.sse.observer_queue, event_tx.clone());
    let core = CoreHandle::new(event_tx.clone());

    let _forward_handle = core::forward_provider_events(provider_rx, event_tx.clone());
    let _provider_handle = provider.spawn_background();

    let _http_handle = http::start_server(
        config.http.bind_address.clone(),
        config.http.port,
        http::AppState {
            core: core.clone(),
            user_header: Arc::from(config.auth.user_header.as_str()),
            sse: config.sse.clone(),
        },
    );

    let shutdown = core.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            shutdown.shutdown().await;
        }
    });

    info!(
        "streamd initialised on {}, running event loop",
        config.bind_addr()
    );
    session_core.run(event_rx).await?;

    Ok(())
}
