// src/pipeline/sites.rs

//! Site health commands.

use crate::error::Result;
use crate::models::SiteHealth;
use crate::utils::log;

use super::PipelineContext;

fn describe(health: &SiteHealth) -> String {
    let state = if health.is_available {
        "available"
    } else {
        "DEACTIVATED"
    };
    let last = health
        .last_successful_scrape
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "{state}, {} consecutive failures, last success {last}",
        health.consecutive_failures
    )
}

/// Print every configured site with its health.
pub fn run_sites_list(ctx: &PipelineContext) {
    log::header("Sites");
    for site in ctx.registry.all_sites() {
        let active = if site.is_active { "" } else { " [inactive]" };
        log::info(&format!("{}{}", site.name, active));
        log::sub_item(&describe(&site.health));
    }
}

/// Clear a site's failure streak and make it schedulable again.
pub async fn run_site_enable(ctx: &PipelineContext, site_name: &str) -> Result<SiteHealth> {
    let health = ctx.registry.reenable(site_name)?;
    ctx.store.save_site_health(site_name, &health).await?;
    log::success(&format!("Site {site_name} re-enabled"));
    Ok(health)
}

/// Print site health, the most recent sessions and the latest summaries.
pub async fn run_info(ctx: &PipelineContext, sessions: usize) -> Result<()> {
    run_sites_list(ctx);

    log::header("Recent Sessions");
    let recent = ctx.store.recent_sessions(sessions).await?;
    if recent.is_empty() {
        log::info("No sessions recorded yet.");
    }
    for session in &recent {
        log::info(&format!(
            "{} {} {} ({} prices, {} errors)",
            session.started_at.format("%Y-%m-%d %H:%M"),
            session.site_name,
            session.status,
            session.prices_extracted,
            session.errors_count
        ));
    }

    let products = ctx.store.all_products().await?;
    let summaries = ctx.store.latest_summaries().await?;
    log::summary(
        "Catalog",
        &[
            ("Products", products.len().to_string()),
            (
                "Monitored",
                products.iter().filter(|p| p.is_tracked()).count().to_string(),
            ),
            ("With summary", summaries.len().to_string()),
        ],
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::{Config, SiteConfig};
    use crate::services::testing::StubFetcher;
    use crate::storage::{MemoryStore, PriceStore};

    #[tokio::test]
    async fn enable_restores_and_persists() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_site_health(
                "a.com",
                &SiteHealth {
                    is_available: false,
                    consecutive_failures: 3,
                    last_successful_scrape: None,
                },
            )
            .await
            .unwrap();
        let config = Config {
            sites: vec![SiteConfig::new("a.com", "https://a.com")],
            ..Config::default()
        };
        let ctx = PipelineContext::with_fetcher(config, store.clone(), Arc::new(StubFetcher::new()))
            .await
            .unwrap();
        assert!(ctx.registry.get_active_sites().is_empty());

        run_site_enable(&ctx, "a.com").await.unwrap();
        assert_eq!(ctx.registry.get_active_sites().len(), 1);
        let saved = store.load_site_health().await.unwrap();
        assert!(saved["a.com"].is_available);
        assert_eq!(saved["a.com"].consecutive_failures, 0);

        assert!(run_site_enable(&ctx, "missing.com").await.is_err());
        run_info(&ctx, 5).await.unwrap();
    }
}
