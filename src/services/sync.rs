// src/services/sync.rs

//! Storefront price sync.
//!
//! Takes the latest summary of every monitored product, picks the requested
//! statistic, and writes it to the storefront when it moved by more than
//! `min_delta` since the last applied price. Writes go out in batches and
//! each item succeeds or fails on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::models::{
    PipelineEvent, PriceType, Product, ProductId, SyncConfig, SyncOutcome, SyncRecord,
    SyncReport,
};
use crate::services::notifier::{self, Notifier};
use crate::storage::PriceStore;
use crate::storefront::{PriceUpdate, Storefront, UpdateResult};

/// Parameters of one sync run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncRequest {
    pub price_type: PriceType,
    pub dry_run: bool,
    pub batch_size: usize,
}

impl SyncRequest {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            price_type: config.price_type,
            dry_run: false,
            batch_size: config.batch_size,
        }
    }
}

/// Round to the storefront's precision.
fn round_price(price: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (price * scale).round() / scale
}

/// A product that will be classified this run.
struct Candidate {
    update: PriceUpdate,
    changed: bool,
}

/// Pushes aggregated prices to a storefront.
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<dyn PriceStore>,
    storefront: Arc<dyn Storefront>,
    notifier: Arc<dyn Notifier>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn PriceStore>,
        storefront: Arc<dyn Storefront>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            storefront,
            notifier,
        }
    }

    /// Classify every target product and, unless dry-running, write the
    /// changed ones.
    pub async fn run_once(&self, request: &SyncRequest) -> Result<SyncReport> {
        let started_at = Utc::now();
        let run_id = format!("sync-{}", started_at.format("%Y%m%dT%H%M%S%3f"));

        let candidates = self.candidates(request.price_type).await?;
        log::info!(
            "Sync {} via {}: {} products, price type {}{}",
            run_id,
            self.storefront.name(),
            candidates.len(),
            request.price_type,
            if request.dry_run { " (dry run)" } else { "" }
        );

        let mut outcomes: HashMap<ProductId, (SyncOutcome, Option<String>)> = HashMap::new();
        let changed: Vec<PriceUpdate> = candidates
            .iter()
            .filter(|c| c.changed)
            .map(|c| c.update.clone())
            .collect();

        if request.dry_run {
            for update in &changed {
                outcomes.insert(update.product_id, (SyncOutcome::Applied, None));
            }
        } else {
            self.write_batches(&changed, request.batch_size.max(1), &mut outcomes)
                .await;
        }

        let records: Vec<SyncRecord> = candidates
            .iter()
            .map(|candidate| {
                let update = &candidate.update;
                let (outcome, error_detail) = if candidate.changed {
                    outcomes.remove(&update.product_id).unwrap_or((
                        SyncOutcome::Failed,
                        Some("no result recorded".to_string()),
                    ))
                } else {
                    (SyncOutcome::SkippedUnchanged, None)
                };
                SyncRecord {
                    run_id: run_id.clone(),
                    product_id: update.product_id,
                    external_id: Some(update.external_id),
                    requested_price: update.price,
                    price_type: request.price_type,
                    outcome,
                    attempted_at: Utc::now(),
                    error_detail,
                    dry_run: request.dry_run,
                }
            })
            .collect();

        if let Err(e) = self.store.append_sync_records(&records).await {
            log::error!("Failed to persist sync records for {}: {}", run_id, e);
        }

        let report = SyncReport {
            run_id,
            price_type: request.price_type,
            dry_run: request.dry_run,
            started_at,
            finished_at: Utc::now(),
            records,
        };
        notifier::emit(self.notifier.as_ref(), &PipelineEvent::from(&report)).await;
        log::info!(
            "Sync {} {}: {} applied, {} unchanged, {} failed",
            report.run_id,
            report.status(),
            report.applied(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    /// Monitored products with a summary and a storefront id, in catalog order.
    async fn candidates(&self, price_type: PriceType) -> Result<Vec<Candidate>> {
        let products = self.store.monitored_products().await?;
        let summaries = self.store.latest_summaries().await?;
        let applied = self.store.last_applied_prices().await?;

        let mut unmapped = 0usize;
        let mut candidates = Vec::new();
        for product in products {
            let Some(summary) = summaries.get(&product.id) else {
                continue;
            };
            let Some(external_id) = product.external_id else {
                unmapped += 1;
                continue;
            };
            let price = round_price(summary.price(price_type), self.config.price_decimals);
            let changed = applied
                .get(&product.id)
                .is_none_or(|last| (price - last).abs() > self.config.min_delta);
            candidates.push(Candidate {
                update: to_update(product, external_id, price),
                changed,
            });
        }
        if unmapped > 0 {
            log::warn!(
                "{} products have summaries but no storefront id; not synced",
                unmapped
            );
        }
        Ok(candidates)
    }

    async fn write_batches(
        &self,
        changed: &[PriceUpdate],
        batch_size: usize,
        outcomes: &mut HashMap<ProductId, (SyncOutcome, Option<String>)>,
    ) {
        let total = changed.len().div_ceil(batch_size);
        for (index, batch) in changed.chunks(batch_size).enumerate() {
            if index > 0 && self.config.batch_pause_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_pause_ms)).await;
            }

            match self.storefront.update_prices(batch).await {
                Ok(results) => {
                    let by_id: HashMap<u64, UpdateResult> = results
                        .into_iter()
                        .map(|r| (r.external_id, r))
                        .collect();
                    for update in batch {
                        let outcome = match by_id.get(&update.external_id) {
                            Some(result) if result.success => (SyncOutcome::Applied, None),
                            Some(result) => (
                                SyncOutcome::Failed,
                                Some(
                                    result
                                        .error
                                        .clone()
                                        .unwrap_or_else(|| "rejected".to_string()),
                                ),
                            ),
                            None => (
                                SyncOutcome::Failed,
                                Some("missing from storefront response".to_string()),
                            ),
                        };
                        outcomes.insert(update.product_id, outcome);
                    }
                }
                Err(e) => {
                    log::error!("Batch {}/{} failed: {}", index + 1, total, e);
                    for update in batch {
                        outcomes.insert(
                            update.product_id,
                            (SyncOutcome::Failed, Some(e.to_string())),
                        );
                    }
                }
            }
            log::debug!("Batch {}/{}: {} items", index + 1, total, batch.len());
        }
    }
}

fn to_update(product: Product, external_id: u64, price: f64) -> PriceUpdate {
    PriceUpdate {
        product_id: product.id,
        external_id,
        sku: product.sku.unwrap_or_default(),
        name: product.name,
        price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Period, PriceSummary, SyncRunStatus};
    use crate::services::testing::{RecordingNotifier, StubStorefront};
    use crate::storage::MemoryStore;

    fn summary(product_id: ProductId, min: f64, avg: f64, max: f64) -> PriceSummary {
        PriceSummary {
            product_id,
            period: Period::Run("r1".into()),
            avg_price: avg,
            min_price: min,
            max_price: max,
            median_price: avg,
            sample_count: 3,
            outliers_excluded: 0,
            observed_until: Utc::now(),
            computed_at: Utc::now(),
        }
    }

    async fn store_with(products: Vec<Product>, summaries: Vec<PriceSummary>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new().with_products(products));
        for s in &summaries {
            store.upsert_summary(s).await.unwrap();
        }
        store
    }

    fn catalog(n: u64) -> Vec<Product> {
        (1..=n)
            .map(|id| Product::new(id, format!("Part {id}")).with_external_id(100 + id))
            .collect()
    }

    fn config() -> SyncConfig {
        SyncConfig {
            batch_pause_ms: 0,
            ..SyncConfig::default()
        }
    }

    fn engine(store: Arc<MemoryStore>, storefront: Arc<StubStorefront>) -> SyncEngine {
        SyncEngine::new(
            config(),
            store,
            storefront,
            Arc::new(RecordingNotifier::default()),
        )
    }

    fn request(price_type: PriceType, dry_run: bool) -> SyncRequest {
        SyncRequest {
            price_type,
            dry_run,
            batch_size: 50,
        }
    }

    #[test]
    fn rounding_follows_decimals() {
        assert_eq!(round_price(1_234_567.6, 0), 1_234_568.0);
        assert_eq!(round_price(12.345, 2), 12.35);
    }

    #[tokio::test]
    async fn unchanged_min_price_is_skipped() {
        let store = store_with(catalog(1), vec![summary(1, 90.0, 100.0, 110.0)]).await;
        store
            .append_sync_records(&[SyncRecord {
                run_id: "old".into(),
                product_id: 1,
                external_id: Some(101),
                requested_price: 90.0,
                price_type: PriceType::Min,
                outcome: SyncOutcome::Applied,
                attempted_at: Utc::now(),
                error_detail: None,
                dry_run: false,
            }])
            .await
            .unwrap();
        let storefront = Arc::new(StubStorefront::new());

        let report = engine(store, storefront.clone())
            .run_once(&request(PriceType::Min, false))
            .await
            .unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].outcome, SyncOutcome::SkippedUnchanged);
        assert_eq!(report.status(), SyncRunStatus::Succeeded);
        assert_eq!(storefront.writes(), 0);
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let store = store_with(
            catalog(2),
            vec![summary(1, 90.0, 100.0, 110.0), summary(2, 9.0, 10.0, 11.0)],
        )
        .await;
        let storefront = Arc::new(StubStorefront::new());
        let engine = engine(store.clone(), storefront.clone());

        let first = engine.run_once(&request(PriceType::Avg, false)).await.unwrap();
        assert_eq!(first.applied(), 2);
        let second = engine.run_once(&request(PriceType::Avg, false)).await.unwrap();
        assert_eq!(second.applied(), 0);
        assert_eq!(second.skipped(), 2);
        assert_eq!(storefront.writes(), 2);
        assert_eq!(store.sync_records().len(), 4);
    }

    #[tokio::test]
    async fn dry_run_matches_real_run_without_writes() {
        let store = store_with(
            catalog(3),
            vec![
                summary(1, 90.0, 100.0, 110.0),
                summary(2, 9.0, 10.0, 11.0),
                summary(3, 900.0, 1000.0, 1100.0),
            ],
        )
        .await;
        let storefront = Arc::new(StubStorefront::new());
        let engine = engine(store.clone(), storefront.clone());

        let dry = engine.run_once(&request(PriceType::Max, true)).await.unwrap();
        assert_eq!(storefront.writes(), 0);
        assert!(store.last_applied_prices().await.unwrap().is_empty());

        let real = engine.run_once(&request(PriceType::Max, false)).await.unwrap();
        let classify = |r: &SyncReport| {
            r.records
                .iter()
                .map(|x| (x.product_id, x.outcome, x.requested_price))
                .collect::<Vec<_>>()
        };
        assert_eq!(classify(&dry), classify(&real));
        assert!(dry.records.iter().all(|r| r.dry_run));
        assert_eq!(storefront.writes(), 3);
    }

    #[tokio::test]
    async fn item_failures_do_not_abort_batches() {
        let store = store_with(
            catalog(5),
            (1..=5).map(|id| summary(id, 90.0, 100.0, 110.0)).collect(),
        )
        .await;
        let storefront = Arc::new(StubStorefront::new().rejecting(&[102]).dropping(&[104]));

        let report = engine(store.clone(), storefront.clone())
            .run_once(&SyncRequest {
                price_type: PriceType::Avg,
                dry_run: false,
                batch_size: 2,
            })
            .await
            .unwrap();

        assert_eq!(storefront.batches().len(), 3);
        assert_eq!(report.applied(), 3);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.status(), SyncRunStatus::Degraded);
        let failed: Vec<_> = report
            .records
            .iter()
            .filter(|r| r.outcome == SyncOutcome::Failed)
            .map(|r| r.product_id)
            .collect();
        assert_eq!(failed, vec![2, 4]);
        assert!(report.records[1].error_detail.is_some());

        let applied = store.last_applied_prices().await.unwrap();
        assert_eq!(applied.len(), 3);
        assert!(!applied.contains_key(&2));
    }

    #[tokio::test]
    async fn failed_batch_fails_only_its_items() {
        let store = store_with(
            catalog(4),
            (1..=4).map(|id| summary(id, 90.0, 100.0, 110.0)).collect(),
        )
        .await;
        let storefront = Arc::new(StubStorefront::new().failing_batch_with(101));

        let report = engine(store, storefront.clone())
            .run_once(&SyncRequest {
                price_type: PriceType::Avg,
                dry_run: false,
                batch_size: 2,
            })
            .await
            .unwrap();

        assert_eq!(report.failed(), 2);
        assert_eq!(report.applied(), 2);
        assert!(
            report.records[0]
                .error_detail
                .as_deref()
                .unwrap()
                .contains("503")
        );
    }

    #[tokio::test]
    async fn all_failures_fail_the_run() {
        let store = store_with(catalog(1), vec![summary(1, 90.0, 100.0, 110.0)]).await;
        let storefront = Arc::new(StubStorefront::new().rejecting(&[101]));
        let report = engine(store, storefront)
            .run_once(&request(PriceType::Avg, false))
            .await
            .unwrap();
        assert_eq!(report.status(), SyncRunStatus::Failed);
    }

    #[tokio::test]
    async fn small_moves_are_noise() {
        let store = store_with(catalog(1), vec![summary(1, 90.0, 100.0, 110.0)]).await;
        let storefront = Arc::new(StubStorefront::new());
        let engine = engine(store.clone(), storefront.clone());
        engine.run_once(&request(PriceType::Avg, false)).await.unwrap();

        store.upsert_summary(&summary(1, 90.0, 100.6, 110.0)).await.unwrap();
        let report = engine.run_once(&request(PriceType::Avg, false)).await.unwrap();
        assert_eq!(report.skipped(), 1);

        store.upsert_summary(&summary(1, 90.0, 102.0, 110.0)).await.unwrap();
        let report = engine.run_once(&request(PriceType::Avg, false)).await.unwrap();
        assert_eq!(report.applied(), 1);
        assert_eq!(report.records[0].requested_price, 102.0);
    }

    #[tokio::test]
    async fn products_without_summary_or_external_id_are_not_targets() {
        let mut products = catalog(2);
        products.push(Product::new(3, "Unmapped"));
        let store = store_with(
            products,
            vec![summary(1, 90.0, 100.0, 110.0), summary(3, 90.0, 100.0, 110.0)],
        )
        .await;
        let report = engine(store, Arc::new(StubStorefront::new()))
            .run_once(&request(PriceType::Avg, false))
            .await
            .unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].product_id, 1);
    }
}
