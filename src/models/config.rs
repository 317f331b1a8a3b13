//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{PeriodKind, PriceType, SiteConfig, SiteSelectors};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP, retry and price-sanity settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Site health policy
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Egress proxy pool
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Price statistics
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Storefront synchronization
    #[serde(default)]
    pub sync: SyncConfig,

    /// Console output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Event outbox
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Site definitions
    #[serde(default = "defaults::default_sites")]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Override storefront credentials from `WOOCOMMERCE_*` variables.
    pub fn with_env_overrides(mut self) -> Self {
        self.sync.api.apply_env(|key| std::env::var(key).ok());
        self
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.session_timeout_secs == 0 {
            return Err(AppError::validation(
                "crawler.session_timeout_secs must be > 0",
            ));
        }
        if self.crawler.min_valid_price >= self.crawler.max_valid_price {
            return Err(AppError::validation(
                "crawler.min_valid_price must be below crawler.max_valid_price",
            ));
        }
        if self.registry.failure_threshold == 0 {
            return Err(AppError::validation(
                "registry.failure_threshold must be > 0",
            ));
        }
        if self.proxy.failure_threshold == 0 {
            return Err(AppError::validation("proxy.failure_threshold must be > 0"));
        }
        if self.proxy.enabled && self.proxy.endpoints.is_empty() {
            return Err(AppError::validation(
                "proxy.enabled is set but no endpoints are configured",
            ));
        }
        if !(self.aggregation.outlier_multiple > 1.0) {
            return Err(AppError::validation(
                "aggregation.outlier_multiple must be > 1",
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(AppError::validation("sync.batch_size must be > 0"));
        }
        if self.sync.min_delta < 0.0 {
            return Err(AppError::validation("sync.min_delta must be >= 0"));
        }
        if self.sites.is_empty() {
            return Err(AppError::validation("No sites defined"));
        }
        let mut names = std::collections::HashSet::new();
        for site in &self.sites {
            site.validate()?;
            if !names.insert(site.name.as_str()) {
                return Err(AppError::validation(format!(
                    "duplicate site name '{}'",
                    site.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig::default(),
            registry: RegistryConfig::default(),
            proxy: ProxyConfig::default(),
            aggregation: AggregationConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
            notifier: NotifierConfig::default(),
            sites: defaults::default_sites(),
        }
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Pick a browser User-Agent at random per request
    #[serde(default)]
    pub rotate_user_agents: bool,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Retries for network errors and retryable statuses
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// First backoff delay, doubled per attempt
    #[serde(default = "defaults::retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Per-site session deadline
    #[serde(default = "defaults::session_timeout")]
    pub session_timeout_secs: u64,

    /// Time given to in-flight requests after a shutdown signal
    #[serde(default = "defaults::shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Random extra pacing added to each site's request delay
    #[serde(default)]
    pub delay_jitter_ms: u64,

    /// Lowest believable price
    #[serde(default = "defaults::min_valid_price")]
    pub min_valid_price: f64,

    /// Highest believable price
    #[serde(default = "defaults::max_valid_price")]
    pub max_valid_price: f64,
}

impl CrawlerConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            rotate_user_agents: false,
            timeout_secs: defaults::timeout(),
            max_retries: defaults::max_retries(),
            retry_base_delay_ms: defaults::retry_base_delay(),
            session_timeout_secs: defaults::session_timeout(),
            shutdown_grace_secs: defaults::shutdown_grace(),
            delay_jitter_ms: 0,
            min_valid_price: defaults::min_valid_price(),
            max_valid_price: defaults::max_valid_price(),
        }
    }
}

/// Site deactivation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Consecutive failed sessions before a site is marked unavailable
    #[serde(default = "defaults::site_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::site_failure_threshold(),
        }
    }
}

/// Proxy pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `host:port` or `user:pass@host:port`, optionally with a scheme
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Consecutive failures before quarantine
    #[serde(default = "defaults::proxy_failure_threshold")]
    pub failure_threshold: u32,

    /// First quarantine duration
    #[serde(default = "defaults::proxy_cooldown")]
    pub cooldown_secs: u64,

    /// Cap for the doubling quarantine duration
    #[serde(default = "defaults::proxy_max_cooldown")]
    pub max_cooldown_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoints: Vec::new(),
            failure_threshold: defaults::proxy_failure_threshold(),
            cooldown_secs: defaults::proxy_cooldown(),
            max_cooldown_secs: defaults::proxy_max_cooldown(),
        }
    }
}

/// Aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Samples outside `[median / k, median * k]` are excluded.
    ///
    /// Any `k > 1` is accepted, including a tight band below 2. The filter
    /// only applies from three samples up, and a band that would exclude
    /// every sample keeps them all, so no product loses its summary to it.
    #[serde(default = "defaults::outlier_multiple")]
    pub outlier_multiple: f64,

    #[serde(default)]
    pub period: PeriodKind,

    /// Average move (percent) that raises a price alert
    #[serde(default = "defaults::alert_threshold")]
    pub alert_threshold_percent: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            outlier_multiple: defaults::outlier_multiple(),
            period: PeriodKind::default(),
            alert_threshold_percent: defaults::alert_threshold(),
        }
    }
}

/// Where sync writes go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncTarget {
    #[default]
    Api,
    Csv,
}

/// Sync engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub price_type: PriceType,

    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Smallest difference from the last applied price that counts as a change
    #[serde(default = "defaults::min_delta")]
    pub min_delta: f64,

    /// Decimal places kept in pushed prices
    #[serde(default)]
    pub price_decimals: u32,

    /// Pause between storefront batches
    #[serde(default = "defaults::batch_pause")]
    pub batch_pause_ms: u64,

    #[serde(default)]
    pub target: SyncTarget,

    /// Output directory for CSV exports (default: `{storage}/exports`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_dir: Option<PathBuf>,

    #[serde(default)]
    pub api: StorefrontApiConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            price_type: PriceType::default(),
            batch_size: defaults::batch_size(),
            min_delta: defaults::min_delta(),
            price_decimals: 0,
            batch_pause_ms: defaults::batch_pause(),
            target: SyncTarget::default(),
            csv_dir: None,
            api: StorefrontApiConfig::default(),
        }
    }
}

/// WooCommerce REST credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorefrontApiConfig {
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub consumer_key: String,

    #[serde(default)]
    pub consumer_secret: String,

    #[serde(default = "defaults::api_timeout")]
    pub timeout_secs: u64,
}

impl StorefrontApiConfig {
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("WOOCOMMERCE_URL") {
            self.base_url = url;
        }
        if let Some(key) = lookup("WOOCOMMERCE_CONSUMER_KEY") {
            self.consumer_key = key;
        }
        if let Some(secret) = lookup("WOOCOMMERCE_CONSUMER_SECRET") {
            self.consumer_secret = secret;
        }
    }

    /// All three credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
            && !self.consumer_key.is_empty()
            && !self.consumer_secret.is_empty()
    }
}

impl Default for StorefrontApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            timeout_secs: defaults::api_timeout(),
        }
    }
}

/// Logging and output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "debug", "info", "warn", "error"
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Print per-site detail lines
    #[serde(default = "defaults::show_progress")]
    pub show_progress: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            show_progress: defaults::show_progress(),
        }
    }
}

/// Notifier settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifierConfig {
    /// JSON-lines file that receives every event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox: Option<PathBuf>,
}

mod defaults {
    use super::{SiteConfig, SiteSelectors};

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; PriceMonitor/1.0)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn retry_base_delay() -> u64 {
        500
    }
    pub fn session_timeout() -> u64 {
        900
    }
    pub fn shutdown_grace() -> u64 {
        10
    }
    pub fn min_valid_price() -> f64 {
        1_000.0
    }
    pub fn max_valid_price() -> f64 {
        100_000_000.0
    }

    // Registry defaults
    pub fn site_failure_threshold() -> u32 {
        3
    }

    // Proxy defaults
    pub fn proxy_failure_threshold() -> u32 {
        3
    }
    pub fn proxy_cooldown() -> u64 {
        300
    }
    pub fn proxy_max_cooldown() -> u64 {
        3600
    }

    // Aggregation defaults
    pub fn outlier_multiple() -> f64 {
        3.0
    }
    pub fn alert_threshold() -> f64 {
        10.0
    }

    // Sync defaults
    pub fn batch_size() -> usize {
        50
    }
    pub fn min_delta() -> f64 {
        1.0
    }
    pub fn batch_pause() -> u64 {
        1000
    }
    pub fn api_timeout() -> u64 {
        30
    }

    // Logging defaults
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn show_progress() -> bool {
        true
    }

    // Site defaults
    fn woocommerce_site(name: &str, delay_ms: u64, concurrent: usize) -> SiteConfig {
        let mut site = SiteConfig::new(name, format!("https://{name}"))
            .with_selectors(SiteSelectors::woocommerce());
        site.request_delay_ms = delay_ms;
        site.concurrent_requests = concurrent;
        site
    }

    pub fn default_sites() -> Vec<SiteConfig> {
        let mut auto_nik = SiteConfig::new("auto-nik.com", "https://auto-nik.com")
            .with_selectors(SiteSelectors {
                price: Some(".price, .price-value".into()),
                title: Some("h1, .product-title".into()),
                availability: Some(".availability, .in-stock".into()),
                ..SiteSelectors::default()
            });
        auto_nik.request_delay_ms = 2000;
        auto_nik.concurrent_requests = 5;

        vec![
            auto_nik,
            woocommerce_site("bmwstor.com", 1500, 8),
            woocommerce_site("benzstor.com", 2000, 6),
            woocommerce_site("japanstor.com", 1600, 7),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_outlier_multiple_at_or_below_one() {
        let mut config = Config::default();
        config.aggregation.outlier_multiple = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_tight_outlier_band() {
        let mut config = Config::default();
        config.aggregation.outlier_multiple = 1.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_sites() {
        let mut config = Config::default();
        let first = config.sites[0].clone();
        config.sites.push(first);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_enabled_proxy_without_endpoints() {
        let mut config = Config::default();
        config.proxy.enabled = true;
        assert!(config.validate().is_err());
        config.proxy.endpoints = vec!["10.0.0.1:8080".into()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_toml_with_sites() {
        let config: Config = toml::from_str(
            r#"
            [registry]
            failure_threshold = 5

            [sync]
            price_type = "min"
            batch_size = 10

            [[sites]]
            name = "shop.example"
            base_url = "https://shop.example"
            request_delay_ms = 100
            selectors = { price = ".price", title = "h1" }
            "#,
        )
        .unwrap();
        assert_eq!(config.registry.failure_threshold, 5);
        assert_eq!(config.sync.price_type, PriceType::Min);
        assert_eq!(config.sync.min_delta, 1.0);
        assert_eq!(config.sites.len(), 1);
        assert_eq!(config.sites[0].selectors.price.as_deref(), Some(".price"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_credentials() {
        let mut api = StorefrontApiConfig::default();
        assert!(!api.is_configured());
        api.apply_env(|key| match key {
            "WOOCOMMERCE_URL" => Some("https://store.example".into()),
            "WOOCOMMERCE_CONSUMER_KEY" => Some("ck".into()),
            "WOOCOMMERCE_CONSUMER_SECRET" => Some("cs".into()),
            _ => None,
        });
        assert!(api.is_configured());
        assert_eq!(api.base_url, "https://store.example");
    }
}
