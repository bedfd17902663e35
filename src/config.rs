//! Persistent service configuration model, defaults, and loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{error, info};

use crate::asset_codec::AssetCodec;
use crate::backends::RetryPolicy;
use crate::downloader::DownloadSettings;
use crate::eviction::EvictionPolicy;

/// Root configuration persisted to `birdcache.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// On-disk media cache.
    pub cache: CacheConfig,
    #[serde(default)]
    /// Upstream catalog, CDN, and taxonomy endpoints.
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub eviction: EvictionConfig,
    #[serde(default)]
    /// Shared state database (frequency scores, cursors, selection indices).
    pub store: StoreConfig,
    #[serde(default)]
    pub asset_codes: AssetCodeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_populate_attempts")]
    pub populate_attempts: u32,
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    /// CDN template with `{id}` and `{size}` placeholders.
    #[serde(default = "default_asset_url_template")]
    pub asset_url_template: String,
    /// Lookup URL with a `{}` placeholder for the species query.
    #[serde(default = "default_taxonomy_url")]
    pub taxonomy_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Zero disables upstream pacing.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EvictionConfig {
    #[serde(default = "default_max_items_per_run")]
    pub max_items_per_run: usize,
    #[serde(default = "default_threshold_multiplier")]
    pub threshold_multiplier: u32,
    #[serde(default = "default_eviction_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AssetCodeConfig {
    /// 32-byte ChaCha20-Poly1305 key as 64 hex characters. Generated when empty.
    #[serde(default)]
    pub key_hex: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: default_cache_root_dir(),
            max_file_size_bytes: default_max_file_size_bytes(),
            populate_attempts: default_populate_attempts(),
            download_concurrency: default_download_concurrency(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
            asset_url_template: default_asset_url_template(),
            taxonomy_url: default_taxonomy_url(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            backoff_unit_ms: default_backoff_unit_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            requests_per_second: default_requests_per_second(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_items_per_run: default_max_items_per_run(),
            threshold_multiplier: default_threshold_multiplier(),
            interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_cache_root_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("birdcache")
}

fn default_max_file_size_bytes() -> u64 {
    6_000_000
}

fn default_populate_attempts() -> u32 {
    3
}

fn default_download_concurrency() -> usize {
    3
}

fn default_catalog_url() -> String {
    "https://search.macaulaylibrary.org/catalog.json?searchField=species".to_string()
}

fn default_asset_url_template() -> String {
    "https://cdn.download.ams.birds.cornell.edu/api/v1/asset/{id}/{size}".to_string()
}

fn default_taxonomy_url() -> String {
    "https://taxonomy.api.macaulaylibrary.org/v1/taxonomy?q={}&key=PUB5447877383".to_string()
}

fn default_page_size() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    1.5
}

fn default_backoff_unit_ms() -> u64 {
    1_000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    30
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_user_agent() -> String {
    format!("birdcache/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_items_per_run() -> usize {
    3
}

fn default_threshold_multiplier() -> u32 {
    2
}

fn default_eviction_interval_secs() -> u64 {
    3_600
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("birdcache")
        .join("state.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl CatalogConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
        }
    }
}

impl Config {
    pub fn download_settings(&self) -> DownloadSettings {
        DownloadSettings {
            max_file_size_bytes: self.cache.max_file_size_bytes,
            concurrency: self.cache.download_concurrency,
        }
    }

    /// Threshold uses the catalog page size as the per-page count.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_items_per_run: self.eviction.max_items_per_run,
            threshold_multiplier: self.eviction.threshold_multiplier,
            count_per_upstream_page: self.catalog.page_size,
        }
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.logging
            .level
            .trim()
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

/// Clamps values that would disable the service outright.
pub fn sanitize_config(config: Config) -> Config {
    let page_size = config.catalog.page_size.clamp(1, 100);
    let backoff_base = if config.catalog.backoff_base.is_finite() {
        config.catalog.backoff_base.clamp(1.0, 10.0)
    } else {
        default_backoff_base()
    };
    Config {
        cache: CacheConfig {
            max_file_size_bytes: config.cache.max_file_size_bytes.max(1),
            populate_attempts: config.cache.populate_attempts.clamp(1, 10),
            download_concurrency: config.cache.download_concurrency.clamp(1, 16),
            ..config.cache
        },
        catalog: CatalogConfig {
            page_size,
            max_retries: config.catalog.max_retries.min(10),
            backoff_base,
            connect_timeout_secs: config.catalog.connect_timeout_secs.max(1),
            read_timeout_secs: config.catalog.read_timeout_secs.max(1),
            ..config.catalog
        },
        eviction: EvictionConfig {
            max_items_per_run: config.eviction.max_items_per_run.max(1),
            threshold_multiplier: config.eviction.threshold_multiplier.max(1),
            interval_secs: config.eviction.interval_secs.max(1),
        },
        ..config
    }
}

fn write_config(path: &Path, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, toml::to_string(config)?)?;
    Ok(())
}

/// Default location, `{config_dir}/birdcache/birdcache.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("birdcache")
        .join("birdcache.toml")
}

/// Reads `path`, writing defaults first when it does not exist. A file that
/// does not parse is an error and is left untouched. A missing asset-code key
/// is generated and persisted.
pub fn load_or_create(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        write_config(path, &Config::default())?;
    }

    let config_content = fs::read_to_string(path)?;
    let mut config = toml::from_str::<Config>(&config_content).map_err(|err| {
        error!("Config file {} is invalid: {}", path.display(), err);
        format!("invalid config file {}: {err}", path.display())
    })?;

    if config.asset_codes.key_hex.trim().is_empty() {
        config.asset_codes.key_hex = AssetCodec::generate_key_hex()?;
        info!("Generated asset code key. path={}", path.display());
        write_config(path, &config)?;
    }
    Ok(sanitize_config(config))
}
