//! Filesystem locations shared by the daemon and the panel.

use std::path::PathBuf;

const APP_DIR: &str = "streamd";

/// Overrides both roots; handy for running several daemons side by side.
const HOME_ENV: &str = "STREAMD_HOME";

fn home_override() -> Option<PathBuf> {
    std::env::var_os(HOME_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `~/.local/share/streamd` on unix, the local data dir elsewhere.
pub fn data_dir() -> PathBuf {
    if let Some(home) = home_override() {
        return home.join("data");
    }
    #[cfg(unix)]
    let base = dirs::home_dir().map(|h| h.join(".local").join("share"));
    #[cfg(not(unix))]
    let base = dirs::data_local_dir();
    base.unwrap_or_else(std::env::temp_dir).join(APP_DIR)
}

/// `~/.config/streamd` on unix, the platform config dir elsewhere.
pub fn config_dir() -> PathBuf {
    if let Some(home) = home_override() {
        return home.join("config");
    }
    #[cfg(unix)]
    let base = dirs::home_dir().map(|h| h.join(".config"));
    #[cfg(not(unix))]
    let base = dirs::config_dir();
    base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

/// Log file for one binary, under the data directory.
pub fn log_path(file_name: &str) -> PathBuf {
    data_dir().join(file_name)
}
