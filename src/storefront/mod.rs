//! Storefront write boundary.
//!
//! The sync engine hands batches of [`PriceUpdate`]s to a [`Storefront`] and
//! gets one [`UpdateResult`] per item back. A batch-level `Err` means none
//! of the items are known to have been written.

pub mod csv;
pub mod woocommerce;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{ProductId, SyncConfig, SyncTarget};

pub use self::csv::CsvExporter;
pub use self::woocommerce::WooCommerceClient;

/// A price to write to one storefront product.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub product_id: ProductId,
    pub external_id: u64,
    pub sku: String,
    pub name: String,
    pub price: f64,
}

impl PriceUpdate {
    /// Price as the storefront expects it, with `decimals` fraction digits.
    pub fn formatted_price(&self, decimals: u32) -> String {
        format!("{:.*}", decimals as usize, self.price)
    }
}

/// Per-item result of a storefront write.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    pub external_id: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl UpdateResult {
    pub fn ok(external_id: u64) -> Self {
        Self {
            external_id,
            success: true,
            error: None,
        }
    }

    pub fn failed(external_id: u64, error: impl Into<String>) -> Self {
        Self {
            external_id,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Destination for price writes.
#[async_trait]
pub trait Storefront: Send + Sync {
    fn name(&self) -> &str;

    async fn update_prices(&self, updates: &[PriceUpdate]) -> Result<Vec<UpdateResult>>;
}

/// Build the storefront selected by `[sync]`.
///
/// `force_csv` overrides the configured target. CSV files land in
/// `sync.csv_dir`, or `{storage_dir}/exports` when unset.
pub fn from_config(
    config: &SyncConfig,
    storage_dir: &Path,
    force_csv: bool,
) -> Result<Arc<dyn Storefront>> {
    if force_csv || config.target == SyncTarget::Csv {
        let dir = config
            .csv_dir
            .clone()
            .unwrap_or_else(|| storage_dir.join("exports"));
        return Ok(Arc::new(CsvExporter::new(dir, config.price_decimals)));
    }

    if !config.api.is_configured() {
        return Err(AppError::config(
            "storefront API credentials missing: set [sync.api] or WOOCOMMERCE_URL, \
             WOOCOMMERCE_CONSUMER_KEY and WOOCOMMERCE_CONSUMER_SECRET",
        ));
    }
    Ok(Arc::new(WooCommerceClient::new(
        &config.api,
        config.price_decimals,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(price: f64) -> PriceUpdate {
        PriceUpdate {
            product_id: 1,
            external_id: 10,
            sku: "BP-1".into(),
            name: "Brake pad".into(),
            price,
        }
    }

    #[test]
    fn formats_with_requested_decimals() {
        assert_eq!(update(1_250_000.0).formatted_price(0), "1250000");
        assert_eq!(update(12.5).formatted_price(2), "12.50");
    }

    #[test]
    fn api_target_requires_credentials() {
        let dir = std::env::temp_dir();
        assert!(from_config(&SyncConfig::default(), &dir, false).is_err());

        let csv = from_config(&SyncConfig::default(), &dir, true).unwrap();
        assert_eq!(csv.name(), "csv");
    }
}
