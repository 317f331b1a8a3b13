// src/services/extractors.rs

//! Per-site field extraction.
//!
//! Each site gets a [`PriceExtractor`], looked up by site name through the
//! [`ExtractorRegistry`]. The generic implementation applies the site's
//! selector map; WooCommerce stores get a variant that understands sale
//! prices and stock classes.

use std::collections::HashMap;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};

use crate::error::Result;
use crate::models::{SiteConfig, SiteSelectors};
use crate::utils::{normalize_whitespace, parse_availability, parse_price, parse_selector};

/// Sites running a WooCommerce theme.
const WOOCOMMERCE_SITES: &[&str] = &["bmwstor.com", "benzstor.com", "japanstor.com"];

/// Field extraction capability for one site.
pub trait PriceExtractor: Send + Sync {
    /// Numeric price inside `scope`, if one can be read.
    fn extract_price(&self, scope: ElementRef<'_>) -> Option<f64>;

    fn extract_title(&self, scope: ElementRef<'_>) -> Option<String>;

    /// Stock state; unknown means available.
    fn extract_availability(&self, scope: ElementRef<'_>) -> bool;

    /// Product link inside a listing card.
    fn extract_link(&self, _card: ElementRef<'_>) -> Option<String> {
        None
    }

    /// Product cards on a listing page.
    fn listing_items<'a>(&self, _page: &'a Html) -> Vec<ElementRef<'a>> {
        Vec::new()
    }

    /// Raw href of the next listing page.
    fn next_page(&self, _page: &Html) -> Option<String> {
        None
    }
}

fn compile(selector: &Option<String>) -> Result<Option<Selector>> {
    selector.as_deref().map(parse_selector).transpose()
}

/// First non-empty text matched by `selector` under `scope`.
fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

/// Applies a site's selector map.
#[derive(Debug)]
pub struct SelectorExtractor {
    price: Option<Selector>,
    title: Option<Selector>,
    availability: Option<Selector>,
    item: Option<Selector>,
    link: Option<Selector>,
    next_page: Option<Selector>,
    attr_name: String,
}

impl SelectorExtractor {
    pub fn new(selectors: &SiteSelectors) -> Result<Self> {
        Ok(Self {
            price: compile(&selectors.price)?,
            title: compile(&selectors.title)?,
            availability: compile(&selectors.availability)?,
            item: compile(&selectors.item)?,
            link: compile(&selectors.link)?,
            next_page: compile(&selectors.next_page)?,
            attr_name: selectors.attr_name.clone(),
        })
    }
}

impl PriceExtractor for SelectorExtractor {
    fn extract_price(&self, scope: ElementRef<'_>) -> Option<f64> {
        let selector = self.price.as_ref()?;
        scope
            .select(selector)
            .find_map(|el| parse_price(&el.text().collect::<String>()))
    }

    fn extract_title(&self, scope: ElementRef<'_>) -> Option<String> {
        first_text(scope, self.title.as_ref()?)
    }

    fn extract_availability(&self, scope: ElementRef<'_>) -> bool {
        let text = self
            .availability
            .as_ref()
            .and_then(|selector| first_text(scope, selector));
        parse_availability(text.as_deref())
    }

    fn extract_link(&self, card: ElementRef<'_>) -> Option<String> {
        let element = match &self.link {
            Some(selector) => card.select(selector).next()?,
            None => card,
        };
        element
            .value()
            .attr(&self.attr_name)
            .map(str::to_string)
            .filter(|href| !href.is_empty())
    }

    fn listing_items<'a>(&self, page: &'a Html) -> Vec<ElementRef<'a>> {
        match &self.item {
            Some(selector) => page.select(selector).collect(),
            None => Vec::new(),
        }
    }

    fn next_page(&self, page: &Html) -> Option<String> {
        let selector = self.next_page.as_ref()?;
        page.select(selector)
            .next()?
            .value()
            .attr(&self.attr_name)
            .map(str::to_string)
    }
}

/// WooCommerce themes: sale price wins over the struck-through one and the
/// `in-stock`/`out-of-stock` classes decide availability.
#[derive(Debug)]
pub struct WooCommerceExtractor {
    inner: SelectorExtractor,
    sale_price: Selector,
    stock: Selector,
}

impl WooCommerceExtractor {
    pub fn new(selectors: &SiteSelectors) -> Result<Self> {
        Ok(Self {
            inner: SelectorExtractor::new(&selectors.or(&SiteSelectors::woocommerce()))?,
            sale_price: parse_selector("ins .woocommerce-Price-amount")?,
            stock: parse_selector(".stock")?,
        })
    }
}

impl PriceExtractor for WooCommerceExtractor {
    fn extract_price(&self, scope: ElementRef<'_>) -> Option<f64> {
        scope
            .select(&self.sale_price)
            .find_map(|el| parse_price(&el.text().collect::<String>()))
            .or_else(|| self.inner.extract_price(scope))
    }

    fn extract_title(&self, scope: ElementRef<'_>) -> Option<String> {
        self.inner.extract_title(scope)
    }

    fn extract_availability(&self, scope: ElementRef<'_>) -> bool {
        if let Some(stock) = scope.select(&self.stock).next() {
            let classes: Vec<&str> = stock.value().classes().collect();
            if classes.contains(&"out-of-stock") {
                return false;
            }
            if classes.contains(&"in-stock") {
                return true;
            }
        }
        self.inner.extract_availability(scope)
    }

    fn extract_link(&self, card: ElementRef<'_>) -> Option<String> {
        self.inner.extract_link(card)
    }

    fn listing_items<'a>(&self, page: &'a Html) -> Vec<ElementRef<'a>> {
        self.inner.listing_items(page)
    }

    fn next_page(&self, page: &Html) -> Option<String> {
        self.inner.next_page(page)
    }
}

/// Extractors keyed by site name.
#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn PriceExtractor>>,
}

impl ExtractorRegistry {
    /// Build the default extractor for every site.
    pub fn for_sites(sites: &[SiteConfig]) -> Result<Self> {
        let mut registry = Self::default();
        for site in sites {
            let extractor: Arc<dyn PriceExtractor> =
                if WOOCOMMERCE_SITES.contains(&site.name.as_str()) {
                    Arc::new(WooCommerceExtractor::new(&site.selectors)?)
                } else {
                    Arc::new(SelectorExtractor::new(&site.selectors)?)
                };
            registry.register(&site.name, extractor);
        }
        Ok(registry)
    }

    /// Install or replace the extractor for a site.
    pub fn register(&mut self, site_name: &str, extractor: Arc<dyn PriceExtractor>) {
        self.extractors.insert(site_name.to_string(), extractor);
    }

    pub fn get(&self, site_name: &str) -> Option<Arc<dyn PriceExtractor>> {
        self.extractors.get(site_name).cloned()
    }
}
