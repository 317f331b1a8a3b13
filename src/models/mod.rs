// src/models/mod.rs

//! Domain models for the price monitor.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod events;
mod observation;
mod product;
mod selectors;
mod session;
mod site;
mod summary;
mod sync;

// Re-export all public types
pub use config::{
    AggregationConfig, Config, CrawlerConfig, LoggingConfig, NotifierConfig, ProxyConfig,
    RegistryConfig, StorefrontApiConfig, SyncConfig, SyncTarget,
};
pub use events::PipelineEvent;
pub use observation::PriceObservation;
pub use product::{Product, ProductId};
pub use selectors::SiteSelectors;
pub use session::{ScrapeSession, SessionStatus};
pub use site::{SiteAuth, SiteConfig, SiteHealth};
pub use summary::{Period, PeriodKind, PriceSummary};
pub use sync::{PriceType, SyncOutcome, SyncRecord, SyncReport, SyncRunStatus};
