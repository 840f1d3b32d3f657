//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/fshare/config.toml`
//! - Windows: `%APPDATA%/fshare/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fshare_protocol::constants::{
    BUS_CHANNEL, DATA_CHANNEL_LABEL, DEFAULT_CHUNK_SIZE, DEFAULT_EXPIRE_TIME, DEFAULT_REQUEST_MAX,
    DEFAULT_REQUEST_THRESHOLD,
};
use fshare_rtc::DEFAULT_ICE_SERVER;
use fshare_session::{DEFAULT_MAX_CHUNKS, SessionConfig};

/// Relay the CLI talks to when nothing else is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:9787";

/// Port `fshare relay` listens on by default.
pub const DEFAULT_RELAY_PORT: u16 = 9787;

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Identity announced on the bus (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    /// WebSocket URL of the relay.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Relay channel shared by all peers.
    #[serde(default = "default_bus_channel")]
    pub bus_channel: String,

    /// Where received files are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// STUN/TURN server URLs.
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_request_max")]
    pub request_max: usize,

    #[serde(default = "default_request_threshold")]
    pub request_threshold: usize,

    /// Retry delay for unanswered chunk requests, in milliseconds.
    #[serde(default = "default_expire_time_ms")]
    pub expire_time_ms: u64,

    #[serde(default = "default_patch_bandwidth")]
    pub patch_bandwidth: bool,

    /// Largest chunk count accepted from an incoming offer.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "fshare".into())
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.into()
}

fn default_bus_channel() -> String {
    BUS_CHANNEL.into()
}

fn default_download_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join("Downloads")
}

fn default_ice_servers() -> Vec<String> {
    vec![DEFAULT_ICE_SERVER.into()]
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_request_max() -> usize {
    DEFAULT_REQUEST_MAX
}

fn default_request_threshold() -> usize {
    DEFAULT_REQUEST_THRESHOLD
}

fn default_expire_time_ms() -> u64 {
    DEFAULT_EXPIRE_TIME.as_millis() as u64
}

fn default_patch_bandwidth() -> bool {
    true
}

fn default_max_chunks() -> usize {
    DEFAULT_MAX_CHUNKS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            relay_url: default_relay_url(),
            bus_channel: default_bus_channel(),
            download_dir: default_download_dir(),
            ice_servers: default_ice_servers(),
            chunk_size: default_chunk_size(),
            request_max: default_request_max(),
            request_threshold: default_request_threshold(),
            expire_time_ms: default_expire_time_ms(),
            patch_bandwidth: default_patch_bandwidth(),
            max_chunks: default_max_chunks(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or the platform default location.
    ///
    /// A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Writes the configuration to `path`, readable only by the owner.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        set_permissions_0600(path);

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Session tunables derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chunk_size: self.chunk_size,
            request_max: self.request_max,
            request_threshold: self.request_threshold,
            expire_time: Duration::from_millis(self.expire_time_ms),
            channel_label: DATA_CHANNEL_LABEL.to_string(),
            patch_bandwidth: self.patch_bandwidth,
            max_chunks: self.max_chunks,
        }
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("fshare").join("config.toml"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home).join(".config"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp"))
    }
}
