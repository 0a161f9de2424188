//! Configuration management for Quill
//!
//! Every section is optional in the file; missing keys fall back to the
//! defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{QuillError, Result, DEFAULT_COMMAND_TIMEOUT_MS};

/// Repository-level Quill configuration
///
/// Loaded from `.quill/config.toml` in the project root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuillConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// Command queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Deadline applied to commands submitted without an explicit timeout
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// How often posted commands are checked against their deadline
    #[serde(default = "default_timeout_check_interval_ms")]
    pub timeout_check_interval_ms: u64,

    /// How often stale terminal commands are purged
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Terminal commands untouched for this long are purged
    #[serde(default = "default_cleanup_max_age_secs")]
    pub cleanup_max_age_secs: u64,
}

/// HTTP bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Terminate whatever process holds the port before binding
    #[serde(default = "default_true")]
    pub reclaim_port: bool,

    /// Treat `GET /commands` as the delivery acknowledgement (pending -> posted)
    #[serde(default = "default_true")]
    pub mark_delivered_on_poll: bool,
}

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// TTL per resource class
    #[serde(default)]
    pub ttl: ResourceTtls,
}

/// TTL (seconds) for each class of upstream resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTtls {
    #[serde(default = "default_cache_ttl_secs")]
    pub file: u64,
    #[serde(default = "default_nodes_ttl_secs")]
    pub nodes: u64,
    #[serde(default = "default_comments_ttl_secs")]
    pub comments: u64,
    #[serde(default = "default_asset_ttl_secs")]
    pub images: u64,
    #[serde(default = "default_asset_ttl_secs")]
    pub styles: u64,
}

/// Adaptive wait settings for the command poller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Consecutive unchanged observations before the interval grows
    #[serde(default = "default_patience")]
    pub patience: u32,

    #[serde(default = "default_timeout_ms")]
    pub default_wait_timeout_ms: u64,
}

/// Pre-mutation backup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
}

/// Read-only upstream document API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_token_header")]
    pub token_header: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// Default value providers
fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_timeout_check_interval_ms() -> u64 {
    1_000
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_cleanup_max_age_secs() -> u64 {
    3_600
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3055
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_nodes_ttl_secs() -> u64 {
    120
}

fn default_comments_ttl_secs() -> u64 {
    30
}

fn default_asset_ttl_secs() -> u64 {
    600
}

fn default_base_interval_ms() -> u64 {
    200
}

fn default_max_interval_ms() -> u64 {
    2_000
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_patience() -> u32 {
    5
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from(".quill/backups")
}

fn default_base_url() -> String {
    "https://api.figma.com".to_string()
}

fn default_token_env() -> String {
    "QUILL_API_TOKEN".to_string()
}

fn default_token_header() -> String {
    "X-Figma-Token".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl QuillConfig {
    /// Load configuration from `.quill/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".quill/config.toml");

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| QuillError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the background tasks cannot run with
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("queue.timeout_check_interval_ms", self.queue.timeout_check_interval_ms),
            ("queue.cleanup_interval_secs", self.queue.cleanup_interval_secs),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
            ("poller.base_interval_ms", self.poller.base_interval_ms),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(QuillError::Config(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }

    /// Write default configuration to `.quill/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(".quill");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| QuillError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }
}

impl QueueConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_check_interval_ms.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_secs)
    }
}

impl BridgeConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            timeout_check_interval_ms: default_timeout_check_interval_ms(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            cleanup_max_age_secs: default_cleanup_max_age_secs(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            reclaim_port: true,
            mark_delivered_on_poll: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            ttl: ResourceTtls::default(),
        }
    }
}

impl Default for ResourceTtls {
    fn default() -> Self {
        Self {
            file: default_cache_ttl_secs(),
            nodes: default_nodes_ttl_secs(),
            comments: default_comments_ttl_secs(),
            images: default_asset_ttl_secs(),
            styles: default_asset_ttl_secs(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: default_base_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            patience: default_patience(),
            default_wait_timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_backup_dir(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            token_header: default_token_header(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
