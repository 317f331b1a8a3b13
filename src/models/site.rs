// src/models/site.rs

//! Per-site scrape configuration and health state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::SiteSelectors;

/// Scrape configuration for one third-party site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Unique site name (e.g., "bmwstor.com")
    pub name: String,

    /// Base endpoint used to resolve relative links
    pub base_url: String,

    /// Field extraction rules
    #[serde(default)]
    pub selectors: SiteSelectors,

    /// Minimum spacing between requests to this site
    #[serde(default = "defaults::request_delay_ms")]
    pub request_delay_ms: u64,

    /// Maximum in-flight requests to this site
    #[serde(default = "defaults::concurrent_requests")]
    pub concurrent_requests: usize,

    /// Site-specific User-Agent (falls back to crawler settings)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Every request must go through a proxy
    #[serde(default)]
    pub requires_proxy: bool,

    /// Site refuses anonymous requests
    #[serde(default)]
    pub requires_auth: bool,

    /// Credentials for sites with `requires_auth`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<SiteAuth>,

    /// Listing pages to scrape instead of per-product pages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listing_urls: Vec<String>,

    /// Follow the `next_page` selector on listing pages
    #[serde(default)]
    pub uses_pagination: bool,

    /// Upper bound on listing pages per listing URL
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,

    /// Currency of prices on this site
    #[serde(default = "defaults::currency")]
    pub currency: String,

    /// Operator switch; inactive sites are never scraped
    #[serde(default = "defaults::yes")]
    pub is_active: bool,

    /// Health state, owned by the orchestrator's outcome reporting
    #[serde(default)]
    pub health: SiteHealth,
}

impl SiteConfig {
    /// Create a site with default limits.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            selectors: SiteSelectors::default(),
            request_delay_ms: defaults::request_delay_ms(),
            concurrent_requests: defaults::concurrent_requests(),
            user_agent: None,
            requires_proxy: false,
            requires_auth: false,
            auth: None,
            listing_urls: Vec::new(),
            uses_pagination: false,
            max_pages: defaults::max_pages(),
            currency: defaults::currency(),
            is_active: true,
            health: SiteHealth::default(),
        }
    }

    /// Set the selector map.
    pub fn with_selectors(mut self, selectors: SiteSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    /// Inter-request spacing.
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// Active and not auto-deactivated.
    pub fn is_schedulable(&self) -> bool {
        self.is_active && self.health.is_available
    }

    /// Whether this site is scraped from listing pages.
    pub fn is_listing(&self) -> bool {
        !self.listing_urls.is_empty()
    }

    /// Basic sanity checks for the site definition.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("site name is empty"));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| AppError::validation(format!("{}: bad base_url: {e}", self.name)))?;
        if self.concurrent_requests == 0 {
            return Err(AppError::validation(format!(
                "{}: concurrent_requests must be > 0",
                self.name
            )));
        }
        if self.is_listing() && self.selectors.item.is_none() {
            return Err(AppError::validation(format!(
                "{}: listing_urls need an item selector",
                self.name
            )));
        }
        if self.uses_pagination && self.max_pages == 0 {
            return Err(AppError::validation(format!(
                "{}: max_pages must be > 0 when paginating",
                self.name
            )));
        }
        self.selectors.validate()
    }
}

/// Health fields mutated only through `SiteRegistry::report_outcome`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteHealth {
    pub is_available: bool,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_scrape: Option<DateTime<Utc>>,
}

impl Default for SiteHealth {
    fn default() -> Self {
        Self {
            is_available: true,
            consecutive_failures: 0,
            last_successful_scrape: None,
        }
    }
}

/// Credentials for a site that refuses anonymous requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SiteAuth {
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
}

mod defaults {
    pub fn request_delay_ms() -> u64 {
        2000
    }
    pub fn concurrent_requests() -> usize {
        5
    }
    pub fn max_pages() -> usize {
        100
    }
    pub fn currency() -> String {
        "IRR".into()
    }
    pub fn yes() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_site() {
        let site: SiteConfig = toml::from_str(
            r#"
            name = "example.com"
            base_url = "https://example.com"
            "#,
        )
        .unwrap();
        assert_eq!(site.request_delay_ms, 2000);
        assert_eq!(site.concurrent_requests, 5);
        assert!(site.is_active);
        assert!(site.health.is_available);
        assert_eq!(site.health.consecutive_failures, 0);
        assert!(site.validate().is_ok());
    }

    #[test]
    fn auth_variants() {
        let bearer: SiteAuth = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(
            bearer,
            SiteAuth::Bearer {
                token: "abc".into()
            }
        );
        let basic: SiteAuth = serde_json::from_str(r#"{"username":"u","password":"p"}"#).unwrap();
        assert!(matches!(basic, SiteAuth::Basic { .. }));
    }

    #[test]
    fn listing_site_needs_item_selector() {
        let mut site = SiteConfig::new("x", "https://x.example");
        site.listing_urls = vec!["https://x.example/shop".into()];
        assert!(site.validate().is_err());
        site.selectors.item = Some("li.product".into());
        assert!(site.validate().is_ok());
    }

    #[test]
    fn unavailable_site_not_schedulable() {
        let mut site = SiteConfig::new("x", "https://x.example");
        assert!(site.is_schedulable());
        site.health.is_available = false;
        assert!(!site.is_schedulable());
    }
}
