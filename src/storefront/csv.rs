//! CSV export target for storefront imports.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use super::{PriceUpdate, Storefront, UpdateResult};
use crate::error::{AppError, Result};

/// Writes each batch to a timestamped CSV file in WooCommerce import layout.
pub struct CsvExporter {
    dir: PathBuf,
    decimals: u32,
}

impl CsvExporter {
    pub fn new(dir: impl Into<PathBuf>, decimals: u32) -> Self {
        Self {
            dir: dir.into(),
            decimals,
        }
    }

    fn next_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        self.dir
            .join(format!("price_update_{stamp}_{:04x}.csv", fastrand::u16(..)))
    }

    fn write_file(&self, path: &Path, updates: &[PriceUpdate]) -> Result<()> {
        let mut writer = ::csv::Writer::from_path(path)?;
        writer.write_record(["ID", "SKU", "Name", "Regular price"])?;
        for update in updates {
            writer.write_record([
                update.external_id.to_string(),
                update.sku.clone(),
                update.name.clone(),
                update.formatted_price(self.decimals),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl Storefront for CsvExporter {
    fn name(&self) -> &str {
        "csv"
    }

    async fn update_prices(&self, updates: &[PriceUpdate]) -> Result<Vec<UpdateResult>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.next_path();
        self.write_file(&path, updates)
            .map_err(|e| AppError::storefront(format!("{}: {}", path.display(), e)))?;
        log::info!("Exported {} prices to {}", updates.len(), path.display());

        Ok(updates
            .iter()
            .map(|u| UpdateResult::ok(u.external_id))
            .collect())
    }
}
