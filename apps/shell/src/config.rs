//! Shell configuration.
//!
//! Read from TOML at `$LIVELINK_CONFIG`, or else:
//! - Linux: `~/.config/livelink/shell.toml`
//! - Windows: `%APPDATA%/livelink/shell.toml`
//!
//! A missing file means defaults. Every field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use livelink_realtime::RealtimeConfig;
use livelink_session::SessionConfig;
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "LIVELINK_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket endpoint of the realtime feed.
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,

    /// Base URL of the auth service.
    #[serde(default = "default_auth_base_url")]
    pub auth_base_url: String,

    /// Directory holding the token file. Platform config dir when unset.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Seconds between heartbeats. `0` turns them off.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Channels to subscribe to on start.
    #[serde(default)]
    pub channels: Vec<String>,
}

fn default_realtime_url() -> String {
    "ws://127.0.0.1:8000/ws".into()
}

fn default_auth_base_url() -> String {
    "http://127.0.0.1:8000/auth".into()
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_reconnect_base_ms() -> u64 {
    3000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            realtime_url: default_realtime_url(),
            auth_base_url: default_auth_base_url(),
            storage_dir: None,
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_base_ms: default_reconnect_base_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            channels: Vec::new(),
        }
    }
}

impl Config {
    /// Loads from `$LIVELINK_CONFIG` or the platform path.
    pub fn load() -> anyhow::Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => config_path(),
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn realtime(&self) -> RealtimeConfig {
        let mut config = RealtimeConfig::new(&self.realtime_url);
        config.heartbeat_interval = Duration::from_secs(self.heartbeat_secs);
        config.reconnect.base_interval = Duration::from_millis(self.reconnect_base_ms);
        config.reconnect.max_attempts = self.max_reconnect_attempts;
        config
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig::new(&self.auth_base_url)
    }
}

fn config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("livelink")
            .join("shell.toml")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("livelink").join("shell.toml")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/livelink/shell.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_defaults() {
        let config = Config::default();
        let realtime = config.realtime();
        assert_eq!(realtime.url, "ws://127.0.0.1:8000/ws");
        assert_eq!(realtime.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(realtime.reconnect.base_interval, Duration::from_millis(3000));
        assert_eq!(realtime.reconnect.max_attempts, 5);
        assert!(config.channels.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            realtime_url = "wss://feed.example.com/ws"
            channels = ["ticks:AAPL", "news"]
            "#,
        )
        .unwrap();
        assert_eq!(config.realtime_url, "wss://feed.example.com/ws");
        assert_eq!(config.channels, vec!["ticks:AAPL", "news"]);
        assert_eq!(config.auth_base_url, default_auth_base_url());
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shell.toml");
        std::fs::write(&path, "heartbeat_secs = 5\nreconnect_base_ms = 250\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.realtime().heartbeat_interval, Duration::from_secs(5));
        assert_eq!(
            config.realtime().reconnect.base_interval,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn missing_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("shell.toml");
        std::fs::write(&path, "heartbeat_secs = \"often\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn config_path_names_app() {
        assert!(config_path().to_string_lossy().contains("livelink"));
    }
}
