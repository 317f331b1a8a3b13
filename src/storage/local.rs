//! Local filesystem store.
//!
//! Snapshots (`products.json`, `site_health.json`, `summaries.json`) are
//! rewritten atomically through a temp file and rename. Observations,
//! sessions and sync records go to append-only JSON-lines files. A single
//! async mutex serializes writers inside the process.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{
    Period, PriceObservation, PriceSummary, Product, ProductId, ScrapeSession, SiteHealth,
    SyncRecord,
};

use super::{PriceStore, applied_prices, latest_by_product, summary_key};

const PRODUCTS: &str = "products.json";
const SITE_HEALTH: &str = "site_health.json";
const SUMMARIES: &str = "summaries.json";
const OBSERVATIONS: &str = "observations.jsonl";
const SESSIONS: &str = "sessions.jsonl";
const SYNC_RECORDS: &str = "sync_records.jsonl";

/// Local filesystem storage backend.
pub struct LocalStore {
    root_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Create a LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Append one JSON document per line.
    async fn append_lines<T: Serialize>(&self, key: &str, values: &[T]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut buffer = Vec::new();
        for value in values {
            serde_json::to_writer(&mut buffer, value)?;
            buffer.push(b'\n');
        }

        let path = self.path(key);
        self.ensure_dir(&path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read a JSON-lines log, skipping lines that no longer parse.
    async fn read_lines<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let Some(bytes) = self.read_bytes(key).await? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        let mut values = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => values.push(value),
                Err(e) => log::warn!("{}:{}: skipping malformed line: {}", key, line_no + 1, e),
            }
        }
        Ok(values)
    }

    async fn read_summaries(&self) -> Result<BTreeMap<String, PriceSummary>> {
        Ok(self.read_json(SUMMARIES).await?.unwrap_or_default())
    }
}

#[async_trait]
impl PriceStore for LocalStore {
    async fn load_site_health(&self) -> Result<BTreeMap<String, SiteHealth>> {
        Ok(self.read_json(SITE_HEALTH).await?.unwrap_or_default())
    }

    async fn save_site_health(&self, site_name: &str, health: &SiteHealth) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.load_site_health().await?;
        all.insert(site_name.to_string(), health.clone());
        self.write_json(SITE_HEALTH, &all).await
    }

    async fn all_products(&self) -> Result<Vec<Product>> {
        match self.read_json(PRODUCTS).await? {
            Some(products) => Ok(products),
            None => {
                log::warn!("No {} found in {}", PRODUCTS, self.root_dir.display());
                Ok(Vec::new())
            }
        }
    }

    async fn save_products(&self, products: &[Product]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(PRODUCTS, products).await
    }

    async fn touch_products(&self, ids: &[ProductId], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut products: Vec<Product> = self.read_json(PRODUCTS).await?.unwrap_or_default();
        for product in products.iter_mut().filter(|p| ids.contains(&p.id)) {
            product.last_scraped = Some(at);
        }
        self.write_json(PRODUCTS, &products).await
    }

    async fn append_observations(&self, observations: &[PriceObservation]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.append_lines(OBSERVATIONS, observations).await
    }

    async fn append_session(&self, session: &ScrapeSession) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.append_lines(SESSIONS, std::slice::from_ref(session)).await
    }

    async fn recent_sessions(&self, limit: usize) -> Result<Vec<ScrapeSession>> {
        let sessions: Vec<ScrapeSession> = self.read_lines(SESSIONS).await?;
        Ok(sessions.into_iter().rev().take(limit).collect())
    }

    async fn observations_in_period(
        &self,
        period: &Period,
        product_id: Option<ProductId>,
    ) -> Result<Vec<PriceObservation>> {
        let observations: Vec<PriceObservation> = self.read_lines(OBSERVATIONS).await?;
        Ok(observations
            .into_iter()
            .filter(|o| period.contains(o))
            .filter(|o| product_id.is_none_or(|id| o.product_id == id))
            .collect())
    }

    async fn upsert_summary(&self, summary: &PriceSummary) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut summaries = self.read_summaries().await?;
        summaries.insert(summary_key(summary), summary.clone());
        self.write_json(SUMMARIES, &summaries).await
    }

    async fn latest_summaries(&self) -> Result<HashMap<ProductId, PriceSummary>> {
        let summaries = self.read_summaries().await?;
        Ok(latest_by_product(summaries.values()))
    }

    async fn append_sync_records(&self, records: &[SyncRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.append_lines(SYNC_RECORDS, records).await
    }

    async fn last_applied_prices(&self) -> Result<HashMap<ProductId, f64>> {
        let records: Vec<SyncRecord> = self.read_lines(SYNC_RECORDS).await?;
        Ok(applied_prices(records.iter()))
    }
}
