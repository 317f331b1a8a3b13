// src/services/aggregator.rs

//! Price aggregation.
//!
//! Reads the observations of one period, keeps available positive prices,
//! drops samples further than `outlier_multiple` from the period median and
//! writes one [`PriceSummary`] per product that still has samples.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{AggregationConfig, Period, PipelineEvent, PriceSummary, ProductId};
use crate::services::notifier::{self, Notifier};
use crate::storage::PriceStore;

/// Result of one aggregation pass.
#[derive(Debug, Clone)]
pub struct AggregationReport {
    pub period: Period,
    pub observations_read: usize,
    pub summaries: Vec<PriceSummary>,
    /// Products observed in the period without a single valid sample
    pub skipped_products: Vec<ProductId>,
    pub alerts: Vec<PipelineEvent>,
}

impl AggregationReport {
    pub fn outliers_excluded(&self) -> usize {
        self.summaries.iter().map(|s| s.outliers_excluded).sum()
    }
}

const MIN_SAMPLES_FOR_OUTLIERS: usize = 3;

/// Median of a sorted, non-empty slice.
fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Samples within `outlier_multiple` of the median.
///
/// Fewer than three samples have no meaningful median, so they are kept
/// as is. A filter that would exclude everything keeps everything.
fn without_outliers(sorted: &[f64], outlier_multiple: f64) -> Vec<f64> {
    if sorted.len() < MIN_SAMPLES_FOR_OUTLIERS {
        return sorted.to_vec();
    }
    let center = median(sorted);
    let low = center / outlier_multiple;
    let high = center * outlier_multiple;
    let kept: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|p| *p >= low && *p <= high)
        .collect();
    if kept.is_empty() {
        sorted.to_vec()
    } else {
        kept
    }
}

/// Statistics for one product in one period, `None` without valid samples.
///
/// `observed_until` starts at `computed_at`; callers that know the
/// observation times overwrite it.
pub fn summarize(
    product_id: ProductId,
    period: &Period,
    prices: &[f64],
    outlier_multiple: f64,
    computed_at: DateTime<Utc>,
) -> Option<PriceSummary> {
    let mut sorted: Vec<f64> = prices
        .iter()
        .copied()
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let kept = without_outliers(&sorted, outlier_multiple);

    let min_price = kept[0];
    let max_price = kept[kept.len() - 1];
    let avg_price = (kept.iter().sum::<f64>() / kept.len() as f64).clamp(min_price, max_price);

    Some(PriceSummary {
        product_id,
        period: period.clone(),
        avg_price,
        min_price,
        max_price,
        median_price: median(&kept),
        sample_count: kept.len(),
        outliers_excluded: sorted.len() - kept.len(),
        observed_until: computed_at,
        computed_at,
    })
}

/// Relative change in percent, `None` when there is no usable base.
fn change_percent(previous: f64, current: f64) -> Option<f64> {
    (previous > 0.0).then(|| (current - previous) / previous * 100.0)
}

/// Computes and stores per-product summaries.
pub struct PriceAggregator {
    config: AggregationConfig,
    store: Arc<dyn PriceStore>,
    notifier: Arc<dyn Notifier>,
}

impl PriceAggregator {
    pub fn new(
        config: AggregationConfig,
        store: Arc<dyn PriceStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        if config.outlier_multiple <= 1.0 {
            return Err(AppError::config(format!(
                "aggregation.outlier_multiple must be > 1, got {}",
                config.outlier_multiple
            )));
        }
        Ok(Self {
            config,
            store,
            notifier,
        })
    }

    /// Aggregate every product observed in `period`.
    pub async fn run_once(&self, period: &Period) -> Result<AggregationReport> {
        let observations = self.store.observations_in_period(period, None).await?;
        let previous = self.store.latest_summaries().await?;
        let names: HashMap<ProductId, String> = self
            .store
            .all_products()
            .await?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        let mut samples: BTreeMap<ProductId, Vec<f64>> = BTreeMap::new();
        let mut last_seen: HashMap<ProductId, DateTime<Utc>> = HashMap::new();
        for obs in &observations {
            let entry = samples.entry(obs.product_id).or_default();
            if obs.is_valid_sample() {
                entry.push(obs.price);
            }
            let seen = last_seen.entry(obs.product_id).or_insert(obs.observed_at);
            *seen = (*seen).max(obs.observed_at);
        }

        let now = Utc::now();
        let mut report = AggregationReport {
            period: period.clone(),
            observations_read: observations.len(),
            summaries: Vec::new(),
            skipped_products: Vec::new(),
            alerts: Vec::new(),
        };

        for (product_id, prices) in samples {
            let Some(mut summary) =
                summarize(product_id, period, &prices, self.config.outlier_multiple, now)
            else {
                log::debug!("Product {} has no valid samples in {}", product_id, period);
                report.skipped_products.push(product_id);
                continue;
            };
            if let Some(seen) = last_seen.get(&product_id) {
                summary.observed_until = *seen;
            }
            if summary.outliers_excluded > 0 {
                log::info!(
                    "Product {}: {} outlier(s) excluded around median {:.0}",
                    product_id,
                    summary.outliers_excluded,
                    summary.median_price
                );
            }
            self.store.upsert_summary(&summary).await?;

            if let Some(alert) = self.price_alert(&summary, previous.get(&product_id), &names) {
                notifier::emit(self.notifier.as_ref(), &alert).await;
                report.alerts.push(alert);
            }
            report.summaries.push(summary);
        }

        log::info!(
            "Aggregated {}: {} summaries from {} observations, {} products without valid samples",
            period,
            report.summaries.len(),
            report.observations_read,
            report.skipped_products.len()
        );
        Ok(report)
    }

    fn price_alert(
        &self,
        current: &PriceSummary,
        previous: Option<&PriceSummary>,
        names: &HashMap<ProductId, String>,
    ) -> Option<PipelineEvent> {
        let previous = previous.filter(|p| p.period != current.period)?;
        let change = change_percent(previous.avg_price, current.avg_price)?;
        if change.abs() < self.config.alert_threshold_percent {
            return None;
        }
        Some(PipelineEvent::PriceAlert {
            product_id: current.product_id,
            product_name: names.get(&current.product_id).cloned().unwrap_or_default(),
            previous_avg: previous.avg_price,
            current_avg: current.avg_price,
            change_percent: change,
        })
    }
}
