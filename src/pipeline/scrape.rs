// src/pipeline/scrape.rs

//! Scrape step.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::services::extractors::ExtractorRegistry;
use crate::services::scraper::{ScrapeOrchestrator, ScrapeRunReport};
use crate::utils::log;

use super::PipelineContext;

/// Scrape all active sites, or only `spider`.
pub async fn run_scrape(
    ctx: &PipelineContext,
    spider: Option<&str>,
    shutdown: &CancellationToken,
) -> Result<ScrapeRunReport> {
    log::header("Price Scraper Starting");

    let extractors = ExtractorRegistry::for_sites(&ctx.registry.all_sites())?;
    let orchestrator = ScrapeOrchestrator::new(
        ctx.config.crawler.clone(),
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.proxies),
        Arc::clone(&ctx.fetcher),
        extractors,
        Arc::clone(&ctx.store),
        Arc::clone(&ctx.notifier),
    );

    let report = orchestrator.run_once(spider, shutdown).await?;

    if ctx.config.logging.show_progress {
        for session in report.sessions() {
            log::sub_item(&format!(
                "{}: {} ({}/{} items, {} prices, {} errors{})",
                session.site_name,
                session.status,
                session.products_scraped,
                session.products_found,
                session.prices_extracted,
                session.errors_count,
                if session.timed_out { ", timed out" } else { "" }
            ));
        }
    }
    for site in &report.deactivated {
        log::warn(&format!("Site {site} deactivated after repeated failures"));
    }

    let elapsed = report.finished_at - report.started_at;
    log::summary(
        "Scrape",
        &[
            ("Run", report.run_id.clone()),
            ("Sites", report.sites.len().to_string()),
            ("Prices", report.observation_count().to_string()),
            ("Errors", report.error_count().to_string()),
            ("Duration", format!("{}s", elapsed.num_seconds())),
        ],
    );
    log::success("Scrape complete");

    Ok(report)
}
