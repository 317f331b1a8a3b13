//! Pipeline entry points, one `run_*` per component.
//!
//! - `run_scrape`: Scrape every active site once
//! - `run_aggregate`: Summarize one period's observations
//! - `run_sync`: Push changed prices to the storefront
//! - `run_pipeline`: Scrape → Aggregate → Sync
//! - `run_validate`: Check configuration without touching the network
//!
//! Each entry point is a single pass; scheduling is left to the caller.

pub mod aggregate;
pub mod pipeline;
pub mod scrape;
pub mod sites;
pub mod sync;
pub mod validate;

use std::sync::Arc;

use crate::error::Result;
use crate::models::Config;
use crate::services::notifier::{self, Notifier};
use crate::services::proxy::ProxyPool;
use crate::services::registry::SiteRegistry;
use crate::storage::PriceStore;
use crate::utils::http::{HttpFetcher, PageFetcher};

pub use aggregate::{resolve_period, run_aggregate};
pub use pipeline::{PipelineOptions, PipelineReport, run_pipeline};
pub use scrape::run_scrape;
pub use sites::{run_info, run_site_enable, run_sites_list};
pub use sync::run_sync;
pub use validate::run_validate;

/// Services wired from one configuration and one store.
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn PriceStore>,
    pub registry: Arc<SiteRegistry>,
    pub proxies: Arc<ProxyPool>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub notifier: Arc<dyn Notifier>,
}

impl PipelineContext {
    /// Build the default services and restore site health from the store.
    pub async fn new(config: Config, store: Arc<dyn PriceStore>) -> Result<Self> {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.crawler)?);
        Self::with_fetcher(config, store, fetcher).await
    }

    /// Same as [`PipelineContext::new`] with a caller-provided fetcher.
    pub async fn with_fetcher(
        config: Config,
        store: Arc<dyn PriceStore>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Result<Self> {
        let health = store.load_site_health().await?;
        let registry = SiteRegistry::from_config(&config).with_health(&health);
        let proxies = ProxyPool::from_config(&config.proxy)?;
        let notifier = notifier::from_config(&config.notifier);

        Ok(Self {
            config: Arc::new(config),
            store,
            registry: Arc::new(registry),
            proxies: Arc::new(proxies),
            fetcher,
            notifier,
        })
    }

    /// Replace the event sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}
