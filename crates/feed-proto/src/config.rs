use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Tuning for the preload window, pagination and scroll canonicalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Items on either side of the active item that get a warmed player.
    #[serde(default = "default_max_preload_distance")]
    pub max_preload_distance: usize,
    /// Fetch more items once this many (or fewer) remain ahead of the active one.
    #[serde(default = "default_low_watermark")]
    pub low_watermark: usize,
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,
    /// Minimum visible percentage before a viewability callback may move the active item.
    #[serde(default = "default_viewability_threshold")]
    pub viewability_threshold: u8,
    /// Height of one feed item in scroll units, used to turn an offset into an index.
    #[serde(default = "default_item_extent")]
    pub item_extent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Local TOML catalog, used when `remote_url` is not set.
    #[serde(default = "default_catalog_file")]
    pub catalog_file: PathBuf,
    /// Paginated JSON endpoint (`?offset=&limit=`). Takes priority over the catalog.
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default = "default_initial_count")]
    pub initial_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_simulated_load_ms")]
    pub simulated_load_ms: u64,
    #[serde(default = "default_simulated_jitter_ms")]
    pub simulated_jitter_ms: u64,
    /// Locator schemes (e.g. `"rtmp"`) the simulated player refuses to load.
    #[serde(default)]
    pub fail_schemes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_preload_distance: default_max_preload_distance(),
            low_watermark: default_low_watermark(),
            fetch_batch_size: default_fetch_batch_size(),
            viewability_threshold: default_viewability_threshold(),
            item_extent: default_item_extent(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            catalog_file: default_catalog_file(),
            remote_url: None,
            initial_count: default_initial_count(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            simulated_load_ms: default_simulated_load_ms(),
            simulated_jitter_ms: default_simulated_jitter_ms(),
            fail_schemes: Vec::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_max_preload_distance() -> usize {
    5
}

fn default_low_watermark() -> usize {
    2
}

fn default_fetch_batch_size() -> usize {
    3
}

fn default_viewability_threshold() -> u8 {
    50
}

fn default_item_extent() -> f64 {
    800.0
}

fn default_catalog_file() -> PathBuf {
    platform::config_dir().join("catalog.toml")
}

fn default_initial_count() -> usize {
    10
}

fn default_simulated_load_ms() -> u64 {
    250
}

fn default_simulated_jitter_ms() -> u64 {
    150
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Read `path`, writing a default config there first if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
