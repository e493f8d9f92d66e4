//! Configuration infrastructure
//!
//! `AppConfig` is loaded with the `config` crate from a JSON or TOML file and
//! layered under `PRICEWATCH__*` environment overrides, e.g.
//! `PRICEWATCH__BATCH__MAX_CONCURRENT_SESSIONS=4`.
//!
//! Every heuristic of the extraction core (selector lists, key names,
//! resolution priority, plausibility range, tick count, timeouts) lives in
//! one of these sections rather than in code.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::infrastructure::http_client::HttpClientConfig;
use crate::infrastructure::mutation_watcher::WatcherConfig;
use crate::infrastructure::page_stabilizer::StabilizerConfig;
use crate::infrastructure::parsing::ParsingConfig;

/// Default values for configuration
pub mod defaults {
    pub const APP_DIR_NAME: &str = "pricewatch";
    pub const CONFIG_FILE_NAME: &str = "config.json";
    pub const ENV_PREFIX: &str = "PRICEWATCH";
    pub const ENV_SEPARATOR: &str = "__";

    pub const REFETCH_DELAY_MS: u64 = 3_000;
    pub const MAX_CONCURRENT_SESSIONS: usize = 1;
    pub const PAGE_DELAY_MS: u64 = 1_000;
    pub const PAGE_DELAY_JITTER_MS: u64 = 1_000;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "pricewatch.log";
    pub const LOG_MAX_FILES: usize = 7;
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }
}

/// Which extraction path a site goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Session-driven: stabilize, watch the container, resolve the page source
    #[default]
    Live,
    /// Fetch the document and run the multi-source resolver only
    Static,
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::Static => f.write_str("static"),
        }
    }
}

/// One product page to watch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: ExtractionMode,
    /// Postal code typed into the delivery-area prompt, if the site shows one
    #[serde(default)]
    pub postal_code: Option<String>,
    /// Script expression returning the price element
    #[serde(default)]
    pub price_js: Option<String>,
}

const fn enabled_by_default() -> bool {
    true
}

impl SiteConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            mode: ExtractionMode::default(),
            postal_code: None,
            price_js: None,
        }
    }

    pub fn with_mode(mut self, mode: ExtractionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Per-page pipeline options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wait before the single static refetch
    pub refetch_delay_ms: u64,
    /// Where stabilization screenshots go; none disables them
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            refetch_delay_ms: defaults::REFETCH_DELAY_MS,
            screenshot_dir: None,
        }
    }
}

/// Batch processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Parallel page workers, each owning its own session
    pub max_concurrent_sessions: usize,
    /// Polite delay between pages of one worker
    pub page_delay_ms: u64,
    /// Random extra delay added on top of `page_delay_ms`
    pub page_delay_jitter_ms: u64,
    /// Where the JSON report is written; none keeps it in memory only
    pub report_path: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: defaults::MAX_CONCURRENT_SESSIONS,
            page_delay_ms: defaults::PAGE_DELAY_MS,
            page_delay_jitter_ms: defaults::PAGE_DELAY_JITTER_MS,
            report_path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Log directory; defaults to `logs/` next to the executable
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
    /// "never", "hourly" or "daily"
    pub rotation: String,
    /// Rotated files kept on startup cleanup
    pub max_files: usize,
    pub auto_cleanup_logs: bool,
    /// Per-target level overrides (e.g. "reqwest": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            rotation: "daily".to_string(),
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("reqwest".to_string(), "warn".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("html5ever".to_string(), "warn".to_string());
                filters.insert("selectors".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sites: Vec<SiteConfig>,
    pub stabilizer: StabilizerConfig,
    pub watcher: WatcherConfig,
    pub resolver: ParsingConfig,
    pub pipeline: PipelineConfig,
    pub http: HttpClientConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sites: vec![SiteConfig {
                enabled: false,
                postal_code: Some("01310-100".to_string()),
                ..SiteConfig::new("example", "https://www.example.com/produto/123")
            }],
            stabilizer: StabilizerConfig::default(),
            watcher: WatcherConfig::default(),
            resolver: ParsingConfig::default(),
            pipeline: PipelineConfig::default(),
            http: HttpClientConfig::default(),
            batch: BatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (format by extension) with environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .separator(defaults::ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Sites that take part in a batch run
    pub fn enabled_sites(&self) -> impl Iterator<Item = &SiteConfig> {
        self.sites.iter().filter(|s| s.enabled)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("stabilizer.page_timeout_ms", self.stabilizer.page_timeout_ms),
            ("stabilizer.content_timeout_ms", self.stabilizer.content_timeout_ms),
            ("stabilizer.interstitial_timeout_ms", self.stabilizer.interstitial_timeout_ms),
            ("stabilizer.poll_interval_ms", self.stabilizer.poll_interval_ms),
            ("watcher.interval_ms", self.watcher.interval_ms),
            ("http.timeout_seconds", self.http.timeout_seconds),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::invalid(format!("{name} must be greater than 0")));
            }
        }

        if self.http.max_requests_per_second == 0 {
            return Err(ConfigError::invalid("http.max_requests_per_second must be greater than 0"));
        }
        if self.batch.max_concurrent_sessions == 0 {
            return Err(ConfigError::invalid("batch.max_concurrent_sessions must be at least 1"));
        }

        let range = &self.resolver.policy.free_text_range;
        if !range.is_well_formed() {
            return Err(ConfigError::invalid(format!(
                "resolver.policy.free_text_range ({}, {}] is empty",
                range.min_exclusive, range.max_inclusive
            )));
        }
        if self.resolver.policy.priority.is_empty() {
            return Err(ConfigError::invalid("resolver.policy.priority must name at least one source"));
        }
        if self.resolver.container_selectors.is_empty() {
            return Err(ConfigError::invalid("resolver.container_selectors must not be empty"));
        }
        if self.resolver.currency_marker.is_empty() {
            return Err(ConfigError::invalid("resolver.currency_marker must not be empty"));
        }

        for site in &self.sites {
            if site.name.trim().is_empty() {
                return Err(ConfigError::invalid(format!("site with url {} has no name", site.url)));
            }
            let parsed = url::Url::parse(&site.url)
                .map_err(|e| ConfigError::invalid(format!("site '{}' has an invalid url: {e}", site.name)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::invalid(format!(
                    "site '{}' url must be http(s), got {}",
                    site.name,
                    parsed.scheme()
                )));
            }
        }

        Ok(())
    }
}

/// Locates, creates and loads the configuration file
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(defaults::APP_DIR_NAME);
        Ok(config_dir)
    }

    /// Manager for the default per-user configuration file
    pub fn new() -> Result<Self> {
        Ok(Self::with_path(Self::get_config_dir()?.join(defaults::CONFIG_FILE_NAME)))
    }

    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Write the default configuration if none exists yet, then load it.
    pub async fn initialize_on_first_run(&self) -> Result<AppConfig> {
        if !fs::try_exists(&self.config_path).await.unwrap_or(false) {
            info!("First run detected, writing default configuration to {:?}", self.config_path);
            self.save_config(&AppConfig::default()).await?;
        }
        self.load_config()
    }

    pub fn load_config(&self) -> Result<AppConfig> {
        let config = AppConfig::from_file(&self.config_path)
            .with_context(|| format!("Failed to load configuration from {}", self.config_path.display()))?;
        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(config)
    }

    /// Save configuration to file as pretty JSON
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price::CandidateSource;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_sites().count(), 0);
    }

    #[tokio::test]
    async fn test_first_run_writes_default_file() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("nested").join("config.json"));

        let config = manager.initialize_on_first_run().await.unwrap();
        assert!(manager.config_path().exists());
        assert_eq!(config.sites.len(), 1);
        assert_eq!(config.watcher.ticks, 10);
    }

    #[test]
    fn test_toml_file_with_partial_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.toml");
        std::fs::write(
            &path,
            r#"
[[sites]]
name = "loja"
url = "https://loja.example.com.br/p/1"
mode = "static"

[watcher]
ticks = 3

[resolver.policy]
priority = ["free_text", "structured_data"]
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.sites[0].mode, ExtractionMode::Static);
        assert!(config.sites[0].enabled);
        assert_eq!(config.watcher.ticks, 3);
        assert_eq!(config.watcher.interval_ms, 1_000);
        assert_eq!(
            config.resolver.policy.priority,
            vec![CandidateSource::FreeText, CandidateSource::StructuredData]
        );
        assert_eq!(config.resolver.currency_marker, "R$");
    }

    #[test]
    fn test_invalid_site_url_is_rejected() {
        let mut config = AppConfig::default();
        config.sites = vec![SiteConfig::new("broken", "not a url")];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let mut config = AppConfig::default();
        config.resolver.policy.free_text_range.min_exclusive = 500.0;
        config.resolver.policy.free_text_range.max_inclusive = 10.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut config = AppConfig::default();
        config.batch.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }
}
