mod app;
mod theme;
mod widgets;

use std::time::Duration;

use stream_panel::client::StreamClient;
use stream_proto::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = stream_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = stream_proto::platform::log_path("panel.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // The terminal belongs to the UI, so logs go to the file only.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("stream-panel log: {}", log_path.display());

    let mut config = Config::load()?;
    config.apply_env_overrides()?;

    // Optional positional argument overrides the configured user.
    let user_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.panel.user_id.clone());
    tracing::info!(
        "stream-panel starting for {} against {}",
        user_id,
        config.panel.server_url
    );

    let client = StreamClient::new(&config.panel.server_url, &config.auth.user_header, &user_id)?;
    let app = app::App::new(
        client,
        user_id,
        Duration::from_millis(config.panel.check_delay_ms),
    );
    app.run().await
}
