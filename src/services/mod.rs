//! Service layer for the price pipeline.
//!
//! This module contains the business logic for:
//! - Site health and scheduling (`SiteRegistry`)
//! - Proxy rotation and quarantine (`ProxyPool`)
//! - Per-site field extraction (`ExtractorRegistry`)
//! - Scrape sessions (`ScrapeOrchestrator`)
//! - Price statistics (`PriceAggregator`)
//! - Storefront price updates (`SyncEngine`)
//! - Outcome events (`Notifier`)

pub mod aggregator;
pub mod extractors;
pub mod notifier;
pub mod proxy;
pub mod registry;
pub mod scraper;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::PriceAggregator;
pub use extractors::{ExtractorRegistry, PriceExtractor};
pub use notifier::Notifier;
pub use proxy::{ProxyEndpoint, ProxyPool};
pub use registry::SiteRegistry;
pub use scraper::ScrapeOrchestrator;
pub use sync::{SyncEngine, SyncRequest};
