use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sse: SseConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub panel: PanelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Identity is injected by an upstream auth layer as a request header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_user_header")]
    pub user_header: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseConfig {
    /// Reconnect delay advertised to clients.
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Full snapshot re-sent on this period even without changes.
    #[serde(default = "default_resnapshot_secs")]
    pub resnapshot_secs: u64,
    /// Per-observer queue depth; a full queue drops the message.
    #[serde(default = "default_observer_queue")]
    pub observer_queue: usize,
}

/// In-process simulated device provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Users whose device session connects at boot.
    #[serde(default = "default_simulated_users")]
    pub simulated_users: Vec<String>,
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
    /// Make every start call fail.
    #[serde(default)]
    pub fail_start: bool,
    /// Seconds per 1% battery drop; 0 disables draining.
    #[serde(default = "default_battery_drain_secs")]
    pub battery_drain_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Delay before the "check existing" query after the first snapshot.
    #[serde(default = "default_check_delay_ms")]
    pub check_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
        }
    }
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            retry_ms: default_retry_ms(),
            keepalive_secs: default_keepalive_secs(),
            resnapshot_secs: default_resnapshot_secs(),
            observer_queue: default_observer_queue(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            simulated_users: default_simulated_users(),
            start_delay_ms: default_start_delay_ms(),
            fail_start: false,
            battery_drain_secs: default_battery_drain_secs(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            user_id: default_user_id(),
            check_delay_ms: default_check_delay_ms(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_user_header() -> String {
    "x-auth-user-id".to_string()
}

fn default_retry_ms() -> u64 {
    3000
}

fn default_keepalive_secs() -> u64 {
    15
}

fn default_resnapshot_secs() -> u64 {
    20
}

fn default_observer_queue() -> usize {
    32
}

fn default_simulated_users() -> Vec<String> {
    vec![default_user_id()]
}

fn default_start_delay_ms() -> u64 {
    400
}

fn default_battery_drain_secs() -> u64 {
    30
}

fn default_server_url() -> String {
    format!("http://{}:{}", default_bind_address(), default_port())
}

fn default_user_id() -> String {
    "demo-user".to_string()
}

fn default_check_delay_ms() -> u64 {
    500
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Apply `STREAMD_PORT` / `STREAMD_BIND` from the process environment.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("STREAMD_PORT") {
            self.http.port = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid STREAMD_PORT {:?}: {}", port, e))?;
        }
        if let Some(bind) = lookup("STREAMD_BIND").filter(|b| !b.trim().is_empty()) {
            self.http.bind_address = bind.trim().to_string();
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http.bind_address, self.http.port)
    }
}
