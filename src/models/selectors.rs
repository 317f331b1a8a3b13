// src/models/selectors.rs

//! CSS selector map for extracting prices from a site.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::parse_selector;

/// Named field to CSS selector rules for one site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteSelectors {
    /// Element holding the price text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,

    /// Element holding the product title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Element holding stock/availability text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,

    /// Product card on a listing page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,

    /// Product link inside a listing card
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    /// "Next page" link on a listing page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,

    /// HTML attribute name for extracting links (usually "href")
    #[serde(default = "default_attr_name")]
    pub attr_name: String,
}

fn default_attr_name() -> String {
    "href".to_string()
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            price: None,
            title: None,
            availability: None,
            item: None,
            link: None,
            next_page: None,
            attr_name: default_attr_name(),
        }
    }
}

impl SiteSelectors {
    /// Selectors shared by WooCommerce storefront themes.
    pub fn woocommerce() -> Self {
        Self {
            price: Some(".woocommerce-Price-amount bdi, p.price .amount".to_string()),
            title: Some("h1.product_title, .product-title".to_string()),
            availability: Some("p.stock, .stock-status".to_string()),
            item: Some("li.product, div.product-small".to_string()),
            link: Some("a.woocommerce-LoopProduct-link, a[href]".to_string()),
            next_page: Some(".woocommerce-pagination .next".to_string()),
            attr_name: default_attr_name(),
        }
    }

    /// Fill every unset field from `fallback`.
    pub fn or(&self, fallback: &SiteSelectors) -> SiteSelectors {
        SiteSelectors {
            price: self.price.clone().or_else(|| fallback.price.clone()),
            title: self.title.clone().or_else(|| fallback.title.clone()),
            availability: self
                .availability
                .clone()
                .or_else(|| fallback.availability.clone()),
            item: self.item.clone().or_else(|| fallback.item.clone()),
            link: self.link.clone().or_else(|| fallback.link.clone()),
            next_page: self.next_page.clone().or_else(|| fallback.next_page.clone()),
            attr_name: self.attr_name.clone(),
        }
    }

    /// Check that every configured selector compiles.
    pub fn validate(&self) -> Result<()> {
        for selector in [
            &self.price,
            &self.title,
            &self.availability,
            &self.item,
            &self.link,
            &self.next_page,
        ]
        .into_iter()
        .flatten()
        {
            parse_selector(selector)?;
        }
        Ok(())
    }
}
