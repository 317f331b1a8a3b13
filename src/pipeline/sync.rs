// src/pipeline/sync.rs

//! Storefront sync step.

use std::sync::Arc;

use crate::error::Result;
use crate::models::{SyncReport, SyncRunStatus};
use crate::services::sync::{SyncEngine, SyncRequest};
use crate::storefront::Storefront;
use crate::utils::log;

use super::PipelineContext;

/// Push changed prices through `storefront`.
pub async fn run_sync(
    ctx: &PipelineContext,
    storefront: Arc<dyn Storefront>,
    request: &SyncRequest,
) -> Result<SyncReport> {
    log::header("Storefront Sync Starting");
    if request.dry_run {
        log::info("Dry run: no prices will be written");
    }

    let engine = SyncEngine::new(
        ctx.config.sync.clone(),
        Arc::clone(&ctx.store),
        storefront,
        Arc::clone(&ctx.notifier),
    );
    let report = engine.run_once(request).await?;

    if ctx.config.logging.show_progress {
        for record in report.records.iter().filter(|r| r.error_detail.is_some()) {
            log::sub_item(&format!(
                "Product {}: {}",
                record.product_id,
                record.error_detail.as_deref().unwrap_or_default()
            ));
        }
    }
    log::summary(
        "Sync",
        &[
            ("Run", report.run_id.clone()),
            ("Price type", report.price_type.to_string()),
            ("Applied", report.applied().to_string()),
            ("Unchanged", report.skipped().to_string()),
            ("Failed", report.failed().to_string()),
            ("Status", report.status().to_string()),
        ],
    );
    match report.status() {
        SyncRunStatus::Succeeded => log::success("Sync complete"),
        SyncRunStatus::Degraded => log::warn("Sync finished with failed items"),
        SyncRunStatus::Failed => log::error("Sync failed for every changed item"),
    }

    Ok(report)
}
