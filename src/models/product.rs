//! Catalog product as seen by the price pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog product identifier.
pub type ProductId = u64;

/// A product tracked across sites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: ProductId,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    #[serde(default)]
    pub category: String,

    /// Storefront product identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<u64>,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default = "default_true")]
    pub is_monitored: bool,

    /// Product page URLs keyed by site name
    #[serde(default)]
    pub site_urls: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scraped: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Product {
    /// Create an active, monitored product without site URLs.
    pub fn new(id: ProductId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            sku: None,
            category: String::new(),
            external_id: None,
            is_active: true,
            is_monitored: true,
            site_urls: BTreeMap::new(),
            last_scraped: None,
        }
    }

    /// Add a page URL for a site.
    pub fn with_url(mut self, site: impl Into<String>, url: impl Into<String>) -> Self {
        self.site_urls.entry(site.into()).or_default().push(url.into());
        self
    }

    /// Set the storefront identifier.
    pub fn with_external_id(mut self, external_id: u64) -> Self {
        self.external_id = Some(external_id);
        self
    }

    /// URLs listed for `site`, in catalog order.
    pub fn urls_for(&self, site: &str) -> &[String] {
        self.site_urls.get(site).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Eligible for scraping and syncing.
    pub fn is_tracked(&self) -> bool {
        self.is_active && self.is_monitored
    }
}
