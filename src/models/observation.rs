//! Raw price observation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ProductId;

/// One price seen on one site at one moment. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceObservation {
    pub product_id: ProductId,
    pub site_name: String,
    pub price: f64,
    pub currency: String,
    pub available: bool,
    pub observed_at: DateTime<Utc>,
    /// Scrape run that produced this observation
    pub run_id: String,
    pub session_id: String,
    #[serde(default)]
    pub url: String,
}

impl PriceObservation {
    /// Build an observation, rejecting prices that can never be stored.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        product_id: ProductId,
        site_name: impl Into<String>,
        price: f64,
        currency: impl Into<String>,
        available: bool,
        observed_at: DateTime<Utc>,
        run_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<Self> {
        if !price.is_finite() || price < 0.0 {
            return Err(AppError::validation(format!(
                "price {price} for product {product_id} is not a non-negative number"
            )));
        }
        Ok(Self {
            product_id,
            site_name: site_name.into(),
            price,
            currency: currency.into(),
            available,
            observed_at,
            run_id: run_id.into(),
            session_id: session_id.into(),
            url: String::new(),
        })
    }

    /// Attach the page URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Counts towards price statistics.
    pub fn is_valid_sample(&self) -> bool {
        self.available && self.price > 0.0
    }
}
