//! WooCommerce REST storefront (`/wp-json/wc/v3/products/batch`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{PriceUpdate, Storefront, UpdateResult};
use crate::error::{AppError, Result};
use crate::models::StorefrontApiConfig;

const BATCH_PATH: &str = "wp-json/wc/v3/products/batch";

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    update: Vec<BatchItem<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchItem<'a> {
    id: u64,
    regular_price: &'a str,
}

#[derive(Debug, Deserialize, Default)]
struct BatchResponse {
    #[serde(default)]
    update: Vec<BatchResponseItem>,
}

#[derive(Debug, Deserialize)]
struct BatchResponseItem {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    error: Option<ItemError>,
}

#[derive(Debug, Deserialize)]
struct ItemError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Writes prices through the WooCommerce batch endpoint.
pub struct WooCommerceClient {
    client: Client,
    endpoint: String,
    consumer_key: String,
    consumer_secret: String,
    decimals: u32,
}

impl WooCommerceClient {
    pub fn new(config: &StorefrontApiConfig, decimals: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/{}", config.base_url.trim_end_matches('/'), BATCH_PATH),
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            decimals,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Storefront for WooCommerceClient {
    fn name(&self) -> &str {
        "woocommerce"
    }

    async fn update_prices(&self, updates: &[PriceUpdate]) -> Result<Vec<UpdateResult>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        let prices: Vec<String> = updates
            .iter()
            .map(|u| u.formatted_price(self.decimals))
            .collect();
        let body = BatchRequest {
            update: updates
                .iter()
                .zip(&prices)
                .map(|(u, price)| BatchItem {
                    id: u.external_id,
                    regular_price: price,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::storefront(format!(
                "batch update returned {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: BatchResponse = response.json().await?;
        log::debug!(
            "WooCommerce batch: {} sent, {} acknowledged",
            updates.len(),
            parsed.update.len()
        );
        Ok(match_results(updates, parsed))
    }
}

/// Pair response entries with the request. Items the response does not
/// mention are left out so the caller can mark them failed.
fn match_results(updates: &[PriceUpdate], response: BatchResponse) -> Vec<UpdateResult> {
    let by_id: HashMap<u64, BatchResponseItem> = response
        .update
        .into_iter()
        .map(|item| (item.id, item))
        .collect();

    updates
        .iter()
        .filter_map(|u| {
            let item = by_id.get(&u.external_id)?;
            Some(match &item.error {
                Some(err) => UpdateResult::failed(u.external_id, format!("{}: {}", err.code, err.message)),
                None => UpdateResult::ok(u.external_id),
            })
        })
        .collect()
}
