// src/pipeline/aggregate.rs

//! Aggregation step.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::error::{AppError, Result};
use crate::models::{Period, PeriodKind};
use crate::services::aggregator::{AggregationReport, PriceAggregator};
use crate::utils::log;

use super::PipelineContext;

/// Pick the aggregation window.
///
/// A run period uses `run_id` or, without one, the most recent recorded
/// scrape run. A daily period uses `date` or today (UTC).
pub async fn resolve_period(
    ctx: &PipelineContext,
    kind: PeriodKind,
    run_id: Option<&str>,
    date: Option<NaiveDate>,
) -> Result<Period> {
    match kind {
        PeriodKind::Daily => Ok(Period::Day(date.unwrap_or_else(|| Utc::now().date_naive()))),
        PeriodKind::Run => {
            if let Some(id) = run_id {
                return Ok(Period::Run(id.to_string()));
            }
            let latest = ctx.store.recent_sessions(1).await?;
            latest
                .first()
                .map(|session| Period::Run(session.run_id.clone()))
                .ok_or_else(|| AppError::config("no scrape run recorded yet; run `scrape` first"))
        }
    }
}

/// Summarize one period.
pub async fn run_aggregate(ctx: &PipelineContext, period: &Period) -> Result<AggregationReport> {
    log::header("Price Aggregation Starting");
    log::info(&format!("Period: {period}"));

    let aggregator = PriceAggregator::new(
        ctx.config.aggregation.clone(),
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.notifier),
    )?;
    let report = aggregator.run_once(period).await?;

    if ctx.config.logging.show_progress {
        for alert in &report.alerts {
            log::sub_item(&format!("Alert: {}", serde_json::to_string(alert)?));
        }
    }
    log::summary(
        "Aggregation",
        &[
            ("Observations", report.observations_read.to_string()),
            ("Summaries", report.summaries.len().to_string()),
            ("Outliers excluded", report.outliers_excluded().to_string()),
            ("Without valid samples", report.skipped_products.len().to_string()),
            ("Price alerts", report.alerts.len().to_string()),
        ],
    );
    log::success("Aggregation complete");

    Ok(report)
}
