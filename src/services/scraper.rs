// src/services/scraper.rs

//! Scrape orchestrator.
//!
//! Every active site gets its own session, run concurrently with the others.
//! Inside a site, at most `concurrent_requests` jobs are in flight and
//! request starts are spaced by `request_delay`. A session ends when its
//! queue drains, its deadline passes, or the shutdown grace period runs
//! out; whatever was collected by then is persisted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use scraper::{ElementRef, Html};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    CrawlerConfig, PipelineEvent, PriceObservation, Product, ProductId, ScrapeSession, SiteConfig,
};
use crate::services::extractors::{ExtractorRegistry, PriceExtractor};
use crate::services::notifier::{self, Notifier};
use crate::services::proxy::{ProxyEndpoint, ProxyPool};
use crate::services::registry::SiteRegistry;
use crate::storage::PriceStore;
use crate::utils::http::{FetchRequest, PageFetcher};
use crate::utils::resolve_url;

/// Spaces request starts for one site.
pub struct RequestPacer {
    delay: Duration,
    jitter_ms: u64,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(delay: Duration, jitter_ms: u64) -> Self {
        Self {
            delay,
            jitter_ms,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for the next free slot and reserve the one after it.
    pub async fn wait(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            let jitter = if self.jitter_ms > 0 {
                Duration::from_millis(fastrand::u64(0..=self.jitter_ms))
            } else {
                Duration::ZERO
            };
            *next = Some(slot + self.delay + jitter);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

/// What was read from one product page or listing card.
#[derive(Debug, Clone, PartialEq)]
struct Extracted {
    price: Option<f64>,
    available: bool,
}

/// Submission order of an item: (job, page, card).
type ItemKey = (usize, usize, usize);

#[derive(Debug, Clone)]
enum ScrapeJob {
    Product {
        index: usize,
        product_id: ProductId,
        url: String,
    },
    Listing {
        index: usize,
        url: String,
    },
}

#[derive(Debug)]
enum JobEvent {
    Item {
        key: ItemKey,
        product_id: ProductId,
        url: String,
        result: Result<Extracted>,
    },
    Failed {
        url: String,
        error: AppError,
    },
    /// Not started or cut short by shutdown
    Skipped,
    /// Infrastructure failure that ends the session
    Aborted(AppError),
}

impl JobEvent {
    fn from_error(url: String, error: AppError) -> Self {
        match error {
            AppError::Cancelled(_) => Self::Skipped,
            AppError::ProxyExhausted(_) => Self::Aborted(error),
            error => Self::Failed { url, error },
        }
    }
}

struct SiteContext {
    site: SiteConfig,
    extractor: Arc<dyn PriceExtractor>,
    pacer: RequestPacer,
    shutdown: CancellationToken,
    /// Normalized product URL to product, for listing cards
    url_index: HashMap<String, ProductId>,
}

/// One site's finished session and the observations it kept.
#[derive(Debug, Clone)]
pub struct SiteRun {
    pub session: ScrapeSession,
    pub observations: Vec<PriceObservation>,
}

/// Result of one `run_once` call.
#[derive(Debug, Clone)]
pub struct ScrapeRunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sites: Vec<SiteRun>,
    /// Sites that crossed the failure threshold during this run
    pub deactivated: Vec<String>,
}

impl ScrapeRunReport {
    pub fn sessions(&self) -> impl Iterator<Item = &ScrapeSession> {
        self.sites.iter().map(|run| &run.session)
    }

    pub fn observation_count(&self) -> usize {
        self.sites.iter().map(|run| run.observations.len()).sum()
    }

    pub fn error_count(&self) -> usize {
        self.sessions().map(|s| s.errors_count).sum()
    }
}

/// Runs scrape sessions for all active sites.
pub struct ScrapeOrchestrator {
    config: CrawlerConfig,
    registry: Arc<SiteRegistry>,
    proxies: Arc<ProxyPool>,
    fetcher: Arc<dyn PageFetcher>,
    extractors: ExtractorRegistry,
    store: Arc<dyn PriceStore>,
    notifier: Arc<dyn Notifier>,
}

impl ScrapeOrchestrator {
    pub fn new(
        config: CrawlerConfig,
        registry: Arc<SiteRegistry>,
        proxies: Arc<ProxyPool>,
        fetcher: Arc<dyn PageFetcher>,
        extractors: ExtractorRegistry,
        store: Arc<dyn PriceStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            registry,
            proxies,
            fetcher,
            extractors,
            store,
            notifier,
        }
    }

    /// Scrape every active site once, or only `spider` when given.
    pub async fn run_once(
        &self,
        spider: Option<&str>,
        shutdown: &CancellationToken,
    ) -> Result<ScrapeRunReport> {
        let started_at = Utc::now();
        let run_id = new_run_id(started_at);

        let mut sites = self.registry.get_active_sites();
        if let Some(name) = spider {
            sites.retain(|site| site.name == name);
            if sites.is_empty() {
                return Err(AppError::config(format!(
                    "site '{name}' is unknown, inactive or deactivated"
                )));
            }
        }

        let products = self.store.monitored_products().await?;
        log::info!(
            "Scrape run {} starting: {} sites, {} monitored products",
            run_id,
            sites.len(),
            products.len()
        );

        let runs = join_all(
            sites
                .into_iter()
                .map(|site| self.run_site(site, &products, &run_id, shutdown)),
        )
        .await;

        let mut deactivated = Vec::new();
        let mut site_runs = Vec::with_capacity(runs.len());
        for (run, was_deactivated) in runs {
            if was_deactivated {
                deactivated.push(run.session.site_name.clone());
            }
            site_runs.push(run);
        }

        Ok(ScrapeRunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            sites: site_runs,
            deactivated,
        })
    }

    async fn run_site(
        &self,
        site: SiteConfig,
        products: &[Product],
        run_id: &str,
        shutdown: &CancellationToken,
    ) -> (SiteRun, bool) {
        let mut session = ScrapeSession::new(&site.name, run_id, Utc::now());

        if site.requires_auth && site.auth.is_none() {
            let error = AppError::AuthRequired(site.name.clone());
            log::warn!("{}", error);
            session.fail(&error, Utc::now());
            return self.finish_site(&site, session, BTreeMap::new(), HashSet::new()).await;
        }
        let Some(extractor) = self.extractors.get(&site.name) else {
            let error = AppError::config(format!("no extractor registered for {}", site.name));
            session.fail(&error, Utc::now());
            return self.finish_site(&site, session, BTreeMap::new(), HashSet::new()).await;
        };

        let jobs = build_jobs(&site, products);
        if !site.is_listing() {
            session.products_found = jobs.len();
        }
        let ctx = SiteContext {
            url_index: build_url_index(&site, products),
            pacer: RequestPacer::new(site.request_delay(), self.config.delay_jitter_ms),
            extractor,
            shutdown: shutdown.clone(),
            site,
        };

        let mut kept: BTreeMap<ProductId, (ItemKey, PriceObservation)> = BTreeMap::new();
        let mut scraped: HashSet<ProductId> = HashSet::new();

        if !jobs.is_empty() {
            session.start();
            log::debug!(
                "{}: {} jobs, concurrency {}, delay {}ms",
                ctx.site.name,
                jobs.len(),
                ctx.site.concurrent_requests,
                ctx.site.request_delay_ms
            );

            let mut results = stream::iter(jobs)
                .map(|job| self.run_job(&ctx, job))
                .buffer_unordered(ctx.site.concurrent_requests.max(1));

            let deadline = tokio::time::sleep(self.config.session_timeout());
            tokio::pin!(deadline);
            let grace_period = self.config.shutdown_grace();
            let grace = async {
                shutdown.cancelled().await;
                tokio::time::sleep(grace_period).await;
            };
            tokio::pin!(grace);

            loop {
                tokio::select! {
                    _ = &mut deadline => {
                        session.timed_out = true;
                        log::warn!("{}: session deadline reached, finalizing", ctx.site.name);
                        break;
                    }
                    _ = &mut grace => {
                        log::warn!("{}: shutdown grace period elapsed", ctx.site.name);
                        break;
                    }
                    next = results.next() => {
                        let Some(events) = next else { break };
                        let aborted = self.apply_events(
                            &ctx,
                            &mut session,
                            events,
                            &mut kept,
                            &mut scraped,
                        );
                        if aborted {
                            break;
                        }
                    }
                }
            }
        }

        if shutdown.is_cancelled() {
            session.interrupted = true;
        }
        self.finish_site(&ctx.site, session, kept, scraped).await
    }

    /// Fold job events into the session. Returns true when the session must stop.
    fn apply_events(
        &self,
        ctx: &SiteContext,
        session: &mut ScrapeSession,
        events: Vec<JobEvent>,
        kept: &mut BTreeMap<ProductId, (ItemKey, PriceObservation)>,
        scraped: &mut HashSet<ProductId>,
    ) -> bool {
        let site = &ctx.site;
        for event in events {
            match event {
                JobEvent::Item {
                    key,
                    product_id,
                    url,
                    result,
                } => {
                    if site.is_listing() {
                        session.products_found += 1;
                    }
                    let observation = result.and_then(|extracted| {
                        extracted
                            .price
                            .map(|price| {
                                PriceObservation::new(
                                    product_id,
                                    &site.name,
                                    price,
                                    &site.currency,
                                    extracted.available,
                                    Utc::now(),
                                    &session.run_id,
                                    &session.session_id,
                                )
                                .map(|obs| obs.with_url(&url))
                            })
                            .transpose()
                    });
                    match observation {
                        Ok(observation) => {
                            session.record_success();
                            scraped.insert(product_id);
                            if let Some(observation) = observation {
                                keep_first(kept, product_id, key, observation);
                            }
                        }
                        Err(error) => {
                            log::warn!("{}: {} failed: {}", site.name, url, error);
                            session.record_failure(&error);
                        }
                    }
                }
                JobEvent::Failed { url, error } => {
                    log::warn!("{}: {} failed: {}", site.name, url, error);
                    session.record_failure(&error);
                }
                JobEvent::Skipped => {}
                JobEvent::Aborted(error) => {
                    log::error!("{}: session aborted: {}", site.name, error);
                    session.record_failure(&error);
                    session.infrastructure_failure = true;
                    return true;
                }
            }
        }
        false
    }

    /// Persist the session, report health and emit events.
    async fn finish_site(
        &self,
        site: &SiteConfig,
        mut session: ScrapeSession,
        kept: BTreeMap<ProductId, (ItemKey, PriceObservation)>,
        scraped: HashSet<ProductId>,
    ) -> (SiteRun, bool) {
        let observations: Vec<PriceObservation> =
            kept.into_values().map(|(_, observation)| observation).collect();
        session.prices_extracted = observations.len();

        if let Err(e) = self.store.append_observations(&observations).await {
            log::error!("{}: failed to persist observations: {}", site.name, e);
            session.error_message.get_or_insert_with(|| e.to_string());
        }

        let now = Utc::now();
        let status = session.finalize(now);

        let touched: Vec<ProductId> = scraped.into_iter().collect();
        if let Err(e) = self.store.touch_products(&touched, now).await {
            log::error!("{}: failed to update last_scraped: {}", site.name, e);
        }
        if let Err(e) = self.store.append_session(&session).await {
            log::error!("{}: failed to persist session: {}", site.name, e);
        }

        let mut deactivated = false;
        if session.counts_towards_health() {
            match self.registry.report_outcome_at(&site.name, session.is_success(), now) {
                Ok(change) => {
                    if let Err(e) = self.store.save_site_health(&site.name, &change.health).await {
                        log::error!("{}: failed to persist health: {}", site.name, e);
                    }
                    if change.deactivated {
                        deactivated = true;
                        let event = PipelineEvent::SiteDeactivated {
                            site_name: site.name.clone(),
                            consecutive_failures: change.health.consecutive_failures,
                            at: now,
                        };
                        notifier::emit(self.notifier.as_ref(), &event).await;
                    }
                }
                Err(e) => log::error!("{}: failed to report outcome: {}", site.name, e),
            }
        } else {
            log::info!(
                "{}: outcome not charged to site health (interrupted or infrastructure failure)",
                site.name
            );
        }

        notifier::emit(self.notifier.as_ref(), &PipelineEvent::from(&session)).await;
        log::info!(
            "{}: session {} {} ({} items, {} prices, {} errors)",
            site.name,
            session.session_id,
            status,
            session.products_found,
            session.prices_extracted,
            session.errors_count
        );

        (
            SiteRun {
                session,
                observations,
            },
            deactivated,
        )
    }

    async fn run_job(&self, ctx: &SiteContext, job: ScrapeJob) -> Vec<JobEvent> {
        if ctx.shutdown.is_cancelled() {
            return vec![JobEvent::Skipped];
        }
        match job {
            ScrapeJob::Product {
                index,
                product_id,
                url,
            } => match self.fetch_with_retry(ctx, &url).await {
                Ok(body) => {
                    let result = extract_page(ctx.extractor.as_ref(), &ctx.site, &body, &self.config);
                    vec![JobEvent::Item {
                        key: (index, 0, 0),
                        product_id,
                        url,
                        result,
                    }]
                }
                Err(error) => vec![JobEvent::from_error(url, error)],
            },
            ScrapeJob::Listing { index, url } => self.run_listing(ctx, index, url).await,
        }
    }

    /// Walk a listing URL and its pagination.
    async fn run_listing(&self, ctx: &SiteContext, index: usize, start: String) -> Vec<JobEvent> {
        let max_pages = if ctx.site.uses_pagination {
            ctx.site.max_pages.max(1)
        } else {
            1
        };

        let mut events = Vec::new();
        let mut visited = HashSet::new();
        let mut page_url = start;
        for page in 0..max_pages {
            if !visited.insert(page_url.clone()) {
                break;
            }
            let body = match self.fetch_with_retry(ctx, &page_url).await {
                Ok(body) => body,
                Err(error) => {
                    events.push(JobEvent::from_error(page_url, error));
                    break;
                }
            };
            let (items, next) = parse_listing(ctx, &body, &page_url, (index, page), &self.config);
            events.extend(items);
            match next {
                Some(next) => page_url = next,
                None => break,
            }
        }
        events
    }

    /// Fetch with pacing, proxy rotation and exponential backoff.
    async fn fetch_with_retry(&self, ctx: &SiteContext, url: &str) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            tokio::select! {
                _ = ctx.pacer.wait() => {}
                _ = ctx.shutdown.cancelled() => {
                    return Err(AppError::Cancelled(format!("shutdown before fetching {url}")));
                }
            }

            let proxy = self.pick_proxy(&ctx.site)?;
            let request = FetchRequest {
                url: url.to_string(),
                proxy: proxy.clone(),
                user_agent: ctx.site.user_agent.clone(),
                auth: ctx.site.auth.clone(),
            };
            let result = self.fetcher.fetch(&request).await;
            if let Some(endpoint) = &proxy {
                self.proxies.release(endpoint, !is_proxy_fault(&result));
            }

            match result {
                Ok(body) => return Ok(body),
                Err(error) if error.is_transient() && attempt < self.config.max_retries => {
                    let backoff = self.backoff(attempt);
                    log::debug!(
                        "{}: retry {}/{} for {} in {:?}: {}",
                        ctx.site.name,
                        attempt + 1,
                        self.config.max_retries,
                        url,
                        backoff,
                        error
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = ctx.shutdown.cancelled() => return Err(error),
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(16));
        Duration::from_millis(self.config.retry_base_delay_ms.saturating_mul(factor))
    }

    /// Proxy for the next request, `None` to go direct.
    fn pick_proxy(&self, site: &SiteConfig) -> Result<Option<ProxyEndpoint>> {
        if self.proxies.is_empty() && !site.requires_proxy {
            return Ok(None);
        }
        match self.proxies.acquire() {
            Ok(endpoint) => Ok(Some(endpoint)),
            Err(error) if site.requires_proxy => Err(error),
            Err(error) => {
                log::debug!("{}: going direct: {}", site.name, error);
                Ok(None)
            }
        }
    }
}

fn new_run_id(now: DateTime<Utc>) -> String {
    format!("{}-{:04x}", now.format("%Y%m%dT%H%M%S"), fastrand::u16(..))
}

/// Network-level failures and blocks count against the proxy.
fn is_proxy_fault(result: &Result<String>) -> bool {
    match result {
        Ok(_) => false,
        Err(AppError::HttpStatus { status, .. }) => matches!(status, 403 | 407 | 429),
        Err(error) => error.is_transient(),
    }
}

fn build_jobs(site: &SiteConfig, products: &[Product]) -> Vec<ScrapeJob> {
    if site.is_listing() {
        return site
            .listing_urls
            .iter()
            .enumerate()
            .map(|(index, url)| ScrapeJob::Listing {
                index,
                url: url.clone(),
            })
            .collect();
    }

    products
        .iter()
        .flat_map(|product| {
            product
                .urls_for(&site.name)
                .iter()
                .map(move |url| (product.id, url.clone()))
        })
        .enumerate()
        .map(|(index, (product_id, url))| ScrapeJob::Product {
            index,
            product_id,
            url,
        })
        .collect()
}

fn normalize_product_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}

fn build_url_index(site: &SiteConfig, products: &[Product]) -> HashMap<String, ProductId> {
    let mut index = HashMap::new();
    for product in products {
        for url in product.urls_for(&site.name) {
            index.entry(normalize_product_url(url)).or_insert(product.id);
        }
    }
    index
}

fn check_price_bounds(price: f64, config: &CrawlerConfig) -> Result<f64> {
    if price < 0.0 {
        return Err(AppError::validation(format!("negative price {price}")));
    }
    if !price.is_finite() || price < config.min_valid_price || price > config.max_valid_price {
        return Err(AppError::validation(format!(
            "price {price} outside [{}, {}]",
            config.min_valid_price, config.max_valid_price
        )));
    }
    Ok(price)
}

/// Read price and availability from a product page or listing card.
fn extract_fields(
    extractor: &dyn PriceExtractor,
    site: &SiteConfig,
    scope: ElementRef<'_>,
    config: &CrawlerConfig,
) -> Result<Extracted> {
    let available = extractor.extract_availability(scope);
    match extractor.extract_price(scope) {
        Some(price) => Ok(Extracted {
            price: Some(check_price_bounds(price, config)?),
            available,
        }),
        None if !available => Ok(Extracted {
            price: None,
            available,
        }),
        None => {
            let title = extractor.extract_title(scope).unwrap_or_default();
            Err(AppError::parse(
                &site.name,
                format!("no price found for '{title}'"),
            ))
        }
    }
}

fn extract_page(
    extractor: &dyn PriceExtractor,
    site: &SiteConfig,
    body: &str,
    config: &CrawlerConfig,
) -> Result<Extracted> {
    let document = Html::parse_document(body);
    extract_fields(extractor, site, document.root_element(), config)
}

/// Items for tracked products on one listing page, plus the next page URL.
fn parse_listing(
    ctx: &SiteContext,
    body: &str,
    page_url: &str,
    (index, page): (usize, usize),
    config: &CrawlerConfig,
) -> (Vec<JobEvent>, Option<String>) {
    let document = Html::parse_document(body);
    let base = Url::parse(page_url).ok();
    let absolute = |href: &str| match &base {
        Some(base) => resolve_url(base, href),
        None => href.to_string(),
    };

    let cards = ctx.extractor.listing_items(&document);
    if cards.is_empty() {
        let error = AppError::parse(&ctx.site.name, format!("no product cards on {page_url}"));
        return (
            vec![JobEvent::Failed {
                url: page_url.to_string(),
                error,
            }],
            None,
        );
    }

    let mut events = Vec::new();
    for (position, card) in cards.into_iter().enumerate() {
        let Some(href) = ctx.extractor.extract_link(card) else {
            continue;
        };
        let url = absolute(&href);
        let Some(&product_id) = ctx.url_index.get(&normalize_product_url(&url)) else {
            continue;
        };
        events.push(JobEvent::Item {
            key: (index, page, position),
            product_id,
            url,
            result: extract_fields(ctx.extractor.as_ref(), &ctx.site, card, config),
        });
    }

    let next = ctx.extractor.next_page(&document).map(|href| absolute(&href));
    (events, next)
}

/// Keep the observation with the lowest submission key per product.
fn keep_first(
    kept: &mut BTreeMap<ProductId, (ItemKey, PriceObservation)>,
    product_id: ProductId,
    key: ItemKey,
    observation: PriceObservation,
) {
    let replace = kept
        .get(&product_id)
        .is_none_or(|(existing, _)| key < *existing);
    if replace {
        kept.insert(product_id, (key, observation));
    }
}
