//! In-memory [`PriceStore`] implementation for tests and dry runs.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Nothing survives the
//! process.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{
    Period, PriceObservation, PriceSummary, Product, ProductId, ScrapeSession, SiteHealth,
    SyncRecord,
};

use super::{PriceStore, applied_prices, latest_by_product, summary_key};

/// In-memory store.
pub struct MemoryStore {
    products: RwLock<Vec<Product>>,
    health: RwLock<BTreeMap<String, SiteHealth>>,
    observations: RwLock<Vec<PriceObservation>>,
    sessions: RwLock<Vec<ScrapeSession>>,
    summaries: RwLock<BTreeMap<String, PriceSummary>>,
    sync_records: RwLock<Vec<SyncRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            products: RwLock::new(Vec::new()),
            health: RwLock::new(BTreeMap::new()),
            observations: RwLock::new(Vec::new()),
            sessions: RwLock::new(Vec::new()),
            summaries: RwLock::new(BTreeMap::new()),
            sync_records: RwLock::new(Vec::new()),
        }
    }

    /// Seed the catalog.
    pub fn with_products(self, products: Vec<Product>) -> Self {
        if let Ok(mut guard) = self.products.write() {
            *guard = products;
        }
        self
    }

    /// Every observation written so far.
    pub fn observations(&self) -> Vec<PriceObservation> {
        self.observations
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Every sync record written so far.
    pub fn sync_records(&self) -> Vec<SyncRecord> {
        self.sync_records
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Every summary row.
    pub fn summaries(&self) -> Vec<PriceSummary> {
        self.summaries
            .read()
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> AppError {
    AppError::store("in-memory store lock poisoned")
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn load_site_health(&self) -> Result<BTreeMap<String, SiteHealth>> {
        Ok(self.health.read().map_err(poisoned)?.clone())
    }

    async fn save_site_health(&self, site_name: &str, health: &SiteHealth) -> Result<()> {
        self.health
            .write()
            .map_err(poisoned)?
            .insert(site_name.to_string(), health.clone());
        Ok(())
    }

    async fn all_products(&self) -> Result<Vec<Product>> {
        Ok(self.products.read().map_err(poisoned)?.clone())
    }

    async fn save_products(&self, products: &[Product]) -> Result<()> {
        *self.products.write().map_err(poisoned)? = products.to_vec();
        Ok(())
    }

    async fn touch_products(&self, ids: &[ProductId], at: DateTime<Utc>) -> Result<()> {
        let mut products = self.products.write().map_err(poisoned)?;
        for product in products.iter_mut().filter(|p| ids.contains(&p.id)) {
            product.last_scraped = Some(at);
        }
        Ok(())
    }

    async fn append_observations(&self, observations: &[PriceObservation]) -> Result<()> {
        self.observations
            .write()
            .map_err(poisoned)?
            .extend_from_slice(observations);
        Ok(())
    }

    async fn append_session(&self, session: &ScrapeSession) -> Result<()> {
        self.sessions.write().map_err(poisoned)?.push(session.clone());
        Ok(())
    }

    async fn recent_sessions(&self, limit: usize) -> Result<Vec<ScrapeSession>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.iter().rev().take(limit).cloned().collect())
    }

    async fn observations_in_period(
        &self,
        period: &Period,
        product_id: Option<ProductId>,
    ) -> Result<Vec<PriceObservation>> {
        let observations = self.observations.read().map_err(poisoned)?;
        Ok(observations
            .iter()
            .filter(|o| period.contains(o))
            .filter(|o| product_id.is_none_or(|id| o.product_id == id))
            .cloned()
            .collect())
    }

    async fn upsert_summary(&self, summary: &PriceSummary) -> Result<()> {
        self.summaries
            .write()
            .map_err(poisoned)?
            .insert(summary_key(summary), summary.clone());
        Ok(())
    }

    async fn latest_summaries(&self) -> Result<HashMap<ProductId, PriceSummary>> {
        let summaries = self.summaries.read().map_err(poisoned)?;
        Ok(latest_by_product(summaries.values()))
    }

    async fn append_sync_records(&self, records: &[SyncRecord]) -> Result<()> {
        self.sync_records
            .write()
            .map_err(poisoned)?
            .extend_from_slice(records);
        Ok(())
    }

    async fn last_applied_prices(&self) -> Result<HashMap<ProductId, f64>> {
        let records = self.sync_records.read().map_err(poisoned)?;
        Ok(applied_prices(records.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PriceType, SyncOutcome};

    fn summary(product_id: ProductId, period: Period, avg: f64, at: DateTime<Utc>) -> PriceSummary {
        PriceSummary {
            product_id,
            period,
            avg_price: avg,
            min_price: avg,
            max_price: avg,
            median_price: avg,
            sample_count: 1,
            outliers_excluded: 0,
            observed_until: at,
            computed_at: at,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_same_period() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let period = Period::Run("r1".into());
        store.upsert_summary(&summary(1, period.clone(), 100.0, now)).await.unwrap();
        store.upsert_summary(&summary(1, period, 120.0, now)).await.unwrap();
        assert_eq!(store.summaries().len(), 1);
        assert_eq!(store.latest_summaries().await.unwrap()[&1].avg_price, 120.0);
    }

    #[tokio::test]
    async fn latest_summary_wins_by_time() {
        let store = MemoryStore::new();
        let earlier = Utc::now() - chrono::Duration::hours(1);
        let later = Utc::now();
        store
            .upsert_summary(&summary(1, Period::Run("b".into()), 200.0, later))
            .await
            .unwrap();
        store
            .upsert_summary(&summary(1, Period::Run("a".into()), 100.0, earlier))
            .await
            .unwrap();
        assert_eq!(store.latest_summaries().await.unwrap()[&1].avg_price, 200.0);
    }

    #[tokio::test]
    async fn recomputing_an_older_day_keeps_newer_day_latest() {
        let store = MemoryStore::new();
        let day = |d: u32| Period::Day(chrono::NaiveDate::from_ymd_opt(2026, 3, d).unwrap());
        let noon = |d: u32| {
            chrono::NaiveDate::from_ymd_opt(2026, 3, d)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
                .and_utc()
        };

        let mut newer = summary(1, day(2), 200.0, Utc::now() - chrono::Duration::hours(1));
        newer.observed_until = noon(2);
        let mut older = summary(1, day(1), 100.0, Utc::now());
        older.observed_until = noon(1);
        store.upsert_summary(&newer).await.unwrap();
        store.upsert_summary(&older).await.unwrap();

        let latest = &store.latest_summaries().await.unwrap()[&1];
        assert_eq!(latest.period, day(2));
        assert_eq!(latest.avg_price, 200.0);
    }

    #[tokio::test]
    async fn dry_run_records_do_not_count_as_applied() {
        let store = MemoryStore::new();
        let record = |price: f64, dry_run: bool, outcome: SyncOutcome| SyncRecord {
            run_id: "r".into(),
            product_id: 1,
            external_id: None,
            requested_price: price,
            price_type: PriceType::Avg,
            outcome,
            attempted_at: Utc::now(),
            error_detail: None,
            dry_run,
        };
        store
            .append_sync_records(&[
                record(100.0, false, SyncOutcome::Applied),
                record(150.0, true, SyncOutcome::Applied),
                record(175.0, false, SyncOutcome::Failed),
            ])
            .await
            .unwrap();
        assert_eq!(store.last_applied_prices().await.unwrap()[&1], 100.0);
    }

    #[tokio::test]
    async fn touch_sets_last_scraped() {
        let store = MemoryStore::new().with_products(vec![Product::new(1, "a"), Product::new(2, "b")]);
        let now = Utc::now();
        store.touch_products(&[2], now).await.unwrap();
        let products = store.all_products().await.unwrap();
        assert_eq!(products[0].last_scraped, None);
        assert_eq!(products[1].last_scraped, Some(now));
    }
}
