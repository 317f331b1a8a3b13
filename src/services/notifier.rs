// src/services/notifier.rs

//! Alerting boundary: hand structured events to whatever delivers them.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{NotifierConfig, PipelineEvent};

/// Receives pipeline events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &PipelineEvent) -> Result<()>;
}

/// Writes each event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &PipelineEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        match event {
            PipelineEvent::SiteDeactivated { .. } | PipelineEvent::PriceAlert { .. } => {
                log::warn!("event {}: {}", event.name(), payload)
            }
            _ => log::info!("event {}: {}", event.name(), payload),
        }
        Ok(())
    }
}

/// Appends events to a JSON-lines outbox consumed by an external sender.
#[derive(Debug)]
pub struct OutboxNotifier {
    path: PathBuf,
    lock: Mutex<()>,
}

impl OutboxNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(&self, event: &PipelineEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Sends every event to each inner notifier.
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, event: &PipelineEvent) -> Result<()> {
        for target in &self.targets {
            emit(target.as_ref(), event).await;
        }
        Ok(())
    }
}

/// Build the notifier described by `[notifier]`.
pub fn from_config(config: &NotifierConfig) -> Arc<dyn Notifier> {
    match &config.outbox {
        Some(path) => Arc::new(FanoutNotifier::new(vec![
            Arc::new(LogNotifier),
            Arc::new(OutboxNotifier::new(path)),
        ])),
        None => Arc::new(LogNotifier),
    }
}

/// Deliver an event; delivery failures are logged and never fail a run.
pub async fn emit(notifier: &dyn Notifier, event: &PipelineEvent) {
    if let Err(e) = notifier.notify(event).await {
        log::error!("Failed to deliver {} event: {}", event.name(), e);
    }
}
