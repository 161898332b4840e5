//! Layered configuration for the hub and client.
//!
//! Sources, later ones winning:
//! - Default values
//! - `.tabsync/settings.toml` (searched from the current directory upwards)
//! - Environment variables
//!
//! # Environment Variables
//!
//! Prefixed with `TABSYNC_`, double underscore separates nesting levels:
//! - `TABSYNC_SERVER__MAX_CONNECTIONS=16` sets `server.max_connections`
//! - `TABSYNC_WATCH__DEBOUNCE_MS=250` sets `watch.debounce_ms`
//! - `TABSYNC_CLIENT__URL=ws://host:8001/ws` sets `client.url`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".tabsync";
pub const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "TABSYNC_";

/// Debounce windows outside this range are clamped.
pub const MIN_DEBOUNCE_MS: u64 = 50;
pub const MAX_DEBOUNCE_MS: u64 = 5000;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Hub / HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Filesystem watching and debouncing
    #[serde(default)]
    pub watch: WatchConfig,

    /// Connection manager and reconciliation settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the hub listens on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Connection ceiling; the next connection is rejected
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Per-connection outbound queue; a full queue drops the connection
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Quiet interval after the last raw notification for a path
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Interval used by the polling fallback
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Skip native notifications and always poll
    #[serde(default)]
    pub force_polling: bool,

    /// How often a removed root is checked for reappearance
    #[serde(default = "default_rearm_interval_ms")]
    pub rearm_interval_ms: u64,

    /// How long an origin claim waits for its debounced event
    #[serde(default = "default_origin_ttl_ms")]
    pub origin_ttl_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket endpoint of the hub
    #[serde(default = "default_client_url")]
    pub url: String,

    /// First reconnection delay after a transient disconnect
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Cap for the exponential reconnection delay
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Minimum wait before a manual retry after rejection
    #[serde(default = "default_rejection_cooldown_ms")]
    pub rejection_cooldown_ms: u64,

    /// Keepalive ping interval; 0 disables keepalive
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Timeout for the re-fetch performed by a hot-patch
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Per-listener event queue
    #[serde(default = "default_listener_queue_capacity")]
    pub listener_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for everything
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `"tabsync::hub" = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_bind() -> String {
    "127.0.0.1:8001".to_string()
}
fn default_max_connections() -> usize {
    64
}
fn default_send_queue_capacity() -> usize {
    256
}
fn default_debounce_ms() -> u64 {
    400
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_rearm_interval_ms() -> u64 {
    1000
}
fn default_origin_ttl_ms() -> u64 {
    5000
}
fn default_client_url() -> String {
    "ws://127.0.0.1:8001/ws".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    2000
}
fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}
fn default_rejection_cooldown_ms() -> u64 {
    30_000
}
fn default_ping_interval_ms() -> u64 {
    20_000
}
fn default_fetch_timeout_ms() -> u64 {
    5000
}
fn default_listener_queue_capacity() -> usize {
    256
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            watch: WatchConfig::default(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_connections: default_max_connections(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            force_polling: false,
            rearm_interval_ms: default_rearm_interval_ms(),
            origin_ttl_ms: default_origin_ttl_ms(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            rejection_cooldown_ms: default_rejection_cooldown_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            listener_queue_capacity: default_listener_queue_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl WatchConfig {
    /// Debounce window, clamped into the supported range.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn rearm_interval(&self) -> Duration {
        Duration::from_millis(self.rearm_interval_ms.max(1))
    }

    pub fn origin_ttl(&self) -> Duration {
        Duration::from_millis(self.origin_ttl_ms)
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms.max(self.reconnect_delay_ms))
    }

    pub fn rejection_cooldown(&self) -> Duration {
        Duration::from_millis(self.rejection_cooldown_ms)
    }

    /// `None` when keepalive is disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting; single underscores stay in field names
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)
    }

    /// Find `.tabsync/settings.toml` from the current directory upwards.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Write a default settings file under the current directory.
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
