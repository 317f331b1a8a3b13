//! Persistent store boundary.
//!
//! The pipeline needs a durable key-indexed table interface, not a database:
//! append-only logs for observations, sessions and sync records, and
//! snapshots for products, site health and summaries.
//!
//! ## Directory Structure (`LocalStore`)
//!
//! ```text
//! storage/
//! ├── config.toml           # Pipeline configuration
//! ├── products.json         # Catalog snapshot (written by the catalog owner)
//! ├── site_health.json      # Site health keyed by site name
//! ├── summaries.json        # PriceSummary rows keyed by product + period
//! ├── observations.jsonl    # Append-only PriceObservation log
//! ├── sessions.jsonl        # Append-only ScrapeSession log
//! └── sync_records.jsonl    # Append-only SyncRecord log
//! ```

pub mod local;
pub mod memory;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Period, PriceObservation, PriceSummary, Product, ProductId, ScrapeSession, SiteHealth,
    SyncOutcome, SyncRecord,
};

pub use local::LocalStore;
pub use memory::MemoryStore;

/// Storage backend for every pipeline table.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Persisted health keyed by site name.
    async fn load_site_health(&self) -> Result<BTreeMap<String, SiteHealth>>;

    async fn save_site_health(&self, site_name: &str, health: &SiteHealth) -> Result<()>;

    async fn all_products(&self) -> Result<Vec<Product>>;

    /// Replace the catalog snapshot.
    async fn save_products(&self, products: &[Product]) -> Result<()>;

    /// Active, monitored products.
    async fn monitored_products(&self) -> Result<Vec<Product>> {
        Ok(self
            .all_products()
            .await?
            .into_iter()
            .filter(Product::is_tracked)
            .collect())
    }

    /// Set `last_scraped` on the given products.
    async fn touch_products(&self, ids: &[ProductId], at: DateTime<Utc>) -> Result<()>;

    async fn append_observations(&self, observations: &[PriceObservation]) -> Result<()>;

    async fn append_session(&self, session: &ScrapeSession) -> Result<()>;

    /// Most recent sessions first.
    async fn recent_sessions(&self, limit: usize) -> Result<Vec<ScrapeSession>>;

    /// Observations inside `period`, optionally for one product.
    async fn observations_in_period(
        &self,
        period: &Period,
        product_id: Option<ProductId>,
    ) -> Result<Vec<PriceObservation>>;

    /// Insert or replace the summary for (product, period).
    async fn upsert_summary(&self, summary: &PriceSummary) -> Result<()>;

    /// Summary of the most recently observed period per product.
    async fn latest_summaries(&self) -> Result<HashMap<ProductId, PriceSummary>>;

    async fn append_sync_records(&self, records: &[SyncRecord]) -> Result<()>;

    /// Most recent non-dry-run applied price per product.
    async fn last_applied_prices(&self) -> Result<HashMap<ProductId, f64>>;
}

/// Key for summary upserts.
pub(crate) fn summary_key(summary: &PriceSummary) -> String {
    format!("{}|{}", summary.product_id, summary.period.key())
}

/// Latest summary per product by observation time, then `computed_at`.
/// Later entries win exact ties.
pub(crate) fn latest_by_product<'a>(
    summaries: impl IntoIterator<Item = &'a PriceSummary>,
) -> HashMap<ProductId, PriceSummary> {
    let mut latest: HashMap<ProductId, PriceSummary> = HashMap::new();
    for summary in summaries {
        let newer = latest
            .get(&summary.product_id)
            .is_none_or(|current| summary.is_newer_than(current));
        if newer {
            latest.insert(summary.product_id, summary.clone());
        }
    }
    latest
}

/// Last applied price per product from records in write order.
pub(crate) fn applied_prices<'a>(
    records: impl IntoIterator<Item = &'a SyncRecord>,
) -> HashMap<ProductId, f64> {
    records
        .into_iter()
        .filter(|r| !r.dry_run && r.outcome == SyncOutcome::Applied)
        .map(|r| (r.product_id, r.requested_price))
        .collect()
}
