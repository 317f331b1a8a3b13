//! End-to-end pass over the public API: scrape → aggregate → sync, twice,
//! against a file-backed store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use price_monitor::error::{AppError, Result};
use price_monitor::models::{
    Config, Period, PriceType, Product, SiteConfig, SiteSelectors, SyncOutcome, SyncRunStatus,
};
use price_monitor::pipeline::{self, PipelineContext, PipelineOptions};
use price_monitor::services::SyncRequest;
use price_monitor::storage::{LocalStore, PriceStore};
use price_monitor::storefront::{PriceUpdate, Storefront, UpdateResult};
use price_monitor::utils::http::{FetchRequest, PageFetcher};

struct Pages(HashMap<String, String>);

#[async_trait]
impl PageFetcher for Pages {
    async fn fetch(&self, request: &FetchRequest) -> Result<String> {
        self.0
            .get(&request.url)
            .cloned()
            .ok_or_else(|| AppError::HttpStatus {
                url: request.url.clone(),
                status: 404,
            })
    }
}

#[derive(Default)]
struct RecordingStorefront {
    writes: Mutex<Vec<PriceUpdate>>,
}

#[async_trait]
impl Storefront for RecordingStorefront {
    fn name(&self) -> &str {
        "recording"
    }

    async fn update_prices(&self, updates: &[PriceUpdate]) -> Result<Vec<UpdateResult>> {
        self.writes.lock().unwrap().extend_from_slice(updates);
        Ok(updates.iter().map(|u| UpdateResult::ok(u.external_id)).collect())
    }
}

fn product_page(price: &str) -> String {
    format!(r#"<html><body><span class="price">{price}</span></body></html>"#)
}

fn site(name: &str) -> SiteConfig {
    let mut site = SiteConfig::new(name, format!("https://{name}")).with_selectors(SiteSelectors {
        price: Some(".price".into()),
        ..SiteSelectors::default()
    });
    site.request_delay_ms = 0;
    site
}

fn config() -> Config {
    let mut config = Config {
        sites: vec![site("a.example"), site("b.example"), site("c.example")],
        ..Config::default()
    };
    config.crawler.retry_base_delay_ms = 1;
    config.sync.batch_pause_ms = 0;
    config.logging.show_progress = false;
    config
}

async fn seeded_store(dir: &TempDir) -> Arc<LocalStore> {
    let store = Arc::new(LocalStore::new(dir.path()));
    let brake = Product::new(1, "Brake pad")
        .with_external_id(501)
        .with_url("a.example", "https://a.example/p/1")
        .with_url("b.example", "https://b.example/p/1")
        .with_url("c.example", "https://c.example/p/1");
    let filter = Product::new(2, "Oil filter")
        .with_external_id(502)
        .with_url("a.example", "https://a.example/p/2")
        .with_url("b.example", "https://b.example/p/2");
    store.save_products(&[brake, filter]).await.unwrap();
    store
}

fn pages() -> Pages {
    Pages(HashMap::from([
        ("https://a.example/p/1".to_string(), product_page("1,000,000")),
        ("https://b.example/p/1".to_string(), product_page("1,020,000")),
        ("https://c.example/p/1".to_string(), product_page("980,000")),
        ("https://a.example/p/2".to_string(), product_page("200,000")),
        // Broken page on b: five times the other price
        ("https://b.example/p/2".to_string(), product_page("1,000,000")),
    ]))
}

#[tokio::test]
async fn full_pipeline_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let ctx = PipelineContext::with_fetcher(config(), store.clone(), Arc::new(pages()))
        .await
        .unwrap();
    let storefront = Arc::new(RecordingStorefront::default());
    let shutdown = CancellationToken::new();

    let first = pipeline::run_pipeline(
        &ctx,
        Some(storefront.clone()),
        &PipelineOptions::default(),
        &shutdown,
    )
    .await
    .unwrap();

    assert_eq!(first.scrape.sites.len(), 3);
    assert_eq!(first.scrape.observation_count(), 5);
    let brake = first
        .aggregation
        .summaries
        .iter()
        .find(|s| s.product_id == 1)
        .unwrap();
    assert_eq!(brake.sample_count, 3);
    assert_eq!(brake.min_price, 980_000.0);
    assert_eq!(brake.max_price, 1_020_000.0);
    assert!((brake.avg_price - 1_000_000.0).abs() < 1e-6);

    // Two samples are too few to call either one an outlier.
    let filter = first
        .aggregation
        .summaries
        .iter()
        .find(|s| s.product_id == 2)
        .unwrap();
    assert_eq!(filter.sample_count, 2);

    let sync = first.sync.unwrap();
    assert_eq!(sync.status(), SyncRunStatus::Succeeded);
    assert_eq!(sync.applied(), 2);
    assert_eq!(storefront.writes.lock().unwrap().len(), 2);

    let second = pipeline::run_pipeline(
        &ctx,
        Some(storefront.clone()),
        &PipelineOptions::default(),
        &shutdown,
    )
    .await
    .unwrap();
    let sync = second.sync.unwrap();
    assert_eq!(sync.applied(), 0);
    assert!(
        sync.records
            .iter()
            .all(|r| r.outcome == SyncOutcome::SkippedUnchanged)
    );
    assert_eq!(storefront.writes.lock().unwrap().len(), 2);

    let sessions = store.recent_sessions(10).await.unwrap();
    assert_eq!(sessions.len(), 6);
    let health = store.load_site_health().await.unwrap();
    assert!(health.values().all(|h| h.consecutive_failures == 0));
}

#[tokio::test]
async fn dry_run_sync_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let ctx = PipelineContext::with_fetcher(config(), store.clone(), Arc::new(pages()))
        .await
        .unwrap();
    let shutdown = CancellationToken::new();

    let scrape = pipeline::run_scrape(&ctx, None, &shutdown).await.unwrap();
    let period = pipeline::resolve_period(&ctx, Default::default(), None, None)
        .await
        .unwrap();
    assert_eq!(period, Period::Run(scrape.run_id.clone()));
    pipeline::run_aggregate(&ctx, &period).await.unwrap();

    let storefront = Arc::new(RecordingStorefront::default());
    let request = SyncRequest {
        price_type: PriceType::Min,
        dry_run: true,
        batch_size: 1,
    };
    let report = pipeline::run_sync(&ctx, storefront.clone(), &request)
        .await
        .unwrap();

    assert_eq!(report.applied(), 2);
    assert!(storefront.writes.lock().unwrap().is_empty());
    assert!(store.last_applied_prices().await.unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_site_is_deactivated_across_runs() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let mut pages = pages();
    pages.0.retain(|url, _| !url.starts_with("https://c.example"));

    let mut config = config();
    config.crawler.max_retries = 0;
    let ctx = PipelineContext::with_fetcher(config.clone(), store.clone(), Arc::new(pages))
        .await
        .unwrap();
    let shutdown = CancellationToken::new();

    for _ in 0..3 {
        pipeline::run_scrape(&ctx, None, &shutdown).await.unwrap();
    }
    assert!(
        ctx.registry
            .get_active_sites()
            .iter()
            .all(|s| s.name != "c.example")
    );

    // A fresh context restores the deactivation from the store.
    let reopened = PipelineContext::with_fetcher(
        config,
        Arc::new(LocalStore::new(tmp.path())),
        Arc::new(Pages(HashMap::new())),
    )
    .await
    .unwrap();
    assert_eq!(reopened.registry.get_active_sites().len(), 2);
}
