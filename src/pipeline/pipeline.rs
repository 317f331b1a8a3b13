// src/pipeline/pipeline.rs

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{Period, PeriodKind, SyncReport};
use crate::services::aggregator::AggregationReport;
use crate::services::scraper::ScrapeRunReport;
use crate::services::sync::SyncRequest;
use crate::storefront::Storefront;
use crate::utils::log;

use super::PipelineContext;
use super::aggregate::run_aggregate;
use super::scrape::run_scrape;
use super::sync::run_sync;

/// Switches for a full pipeline pass.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub spider: Option<String>,
    pub skip_sync: bool,
    pub dry_run: bool,
}

/// What each step produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub scrape: ScrapeRunReport,
    pub aggregation: AggregationReport,
    pub sync: Option<SyncReport>,
}

/// Run the full pipeline: Scrape → Aggregate → Sync.
///
/// Sync is skipped when `skip_sync` is set, when no storefront is given,
/// or after a shutdown request.
pub async fn run_pipeline(
    ctx: &PipelineContext,
    storefront: Option<Arc<dyn Storefront>>,
    options: &PipelineOptions,
    shutdown: &CancellationToken,
) -> Result<PipelineReport> {
    log::header("Price Pipeline Starting");

    let storefront = storefront.filter(|_| !options.skip_sync);
    let total_steps = if storefront.is_some() { 3 } else { 2 };

    log::step(1, total_steps, "Scrape - Collecting prices");
    let scrape = run_scrape(ctx, options.spider.as_deref(), shutdown).await?;

    log::step(2, total_steps, "Aggregate - Computing summaries");
    let period = match ctx.config.aggregation.period {
        PeriodKind::Run => Period::Run(scrape.run_id.clone()),
        PeriodKind::Daily => Period::Day(scrape.started_at.date_naive()),
    };
    let aggregation = run_aggregate(ctx, &period).await?;

    let sync = match storefront {
        Some(_) if shutdown.is_cancelled() => {
            log::warn("Shutdown requested, skipping sync");
            None
        }
        Some(storefront) => {
            log::step(3, total_steps, "Sync - Updating storefront prices");
            let request = SyncRequest {
                dry_run: options.dry_run,
                ..SyncRequest::from_config(&ctx.config.sync)
            };
            Some(run_sync(ctx, storefront, &request).await?)
        }
        None => None,
    };

    log::success("Pipeline complete");

    Ok(PipelineReport {
        scrape,
        aggregation,
        sync,
    })
}
