//! Stubs shared by the service tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::PipelineEvent;
use crate::services::notifier::Notifier;
use crate::storefront::{PriceUpdate, Storefront, UpdateResult};
use crate::utils::http::{FetchRequest, PageFetcher};

/// Canned reply for one fetch call.
#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    Status(u16),
    Transient,
    Slow(Duration, String),
}

/// Serves canned replies per URL. The last reply repeats.
#[derive(Default)]
pub struct StubFetcher {
    replies: HashMap<String, Vec<Reply>>,
    calls: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, body: impl Into<String>) -> Self {
        self.replies
            .insert(url.to_string(), vec![Reply::Body(body.into())]);
        self
    }

    pub fn replies(mut self, url: &str, replies: Vec<Reply>) -> Self {
        self.replies.insert(url.to_string(), replies);
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(request.url.clone()).or_default();
            *count += 1;
            *count - 1
        };
        self.requests.lock().unwrap().push(request.clone());

        let reply = match self.replies.get(&request.url) {
            Some(replies) => replies[call.min(replies.len() - 1)].clone(),
            None => Reply::Status(404),
        };
        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Status(status) => Err(AppError::HttpStatus {
                url: request.url.clone(),
                status,
            }),
            Reply::Transient => Err(AppError::fetch(&request.url, "connection reset")),
            Reply::Slow(delay, body) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
        }
    }
}

/// Collects every event.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &PipelineEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Storefront that records batches and rejects chosen external ids.
#[derive(Default)]
pub struct StubStorefront {
    reject: Vec<u64>,
    /// External ids omitted from the response
    drop: Vec<u64>,
    /// Fail whole batches containing this id
    fail_batch_with: Option<u64>,
    batches: Mutex<Vec<Vec<PriceUpdate>>>,
}

impl StubStorefront {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, ids: &[u64]) -> Self {
        self.reject.extend_from_slice(ids);
        self
    }

    pub fn dropping(mut self, ids: &[u64]) -> Self {
        self.drop.extend_from_slice(ids);
        self
    }

    pub fn failing_batch_with(mut self, id: u64) -> Self {
        self.fail_batch_with = Some(id);
        self
    }

    pub fn batches(&self) -> Vec<Vec<PriceUpdate>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn writes(&self) -> usize {
        self.batches().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl Storefront for StubStorefront {
    fn name(&self) -> &str {
        "stub"
    }

    async fn update_prices(&self, updates: &[PriceUpdate]) -> Result<Vec<UpdateResult>> {
        self.batches.lock().unwrap().push(updates.to_vec());
        if let Some(id) = self.fail_batch_with {
            if updates.iter().any(|u| u.external_id == id) {
                return Err(AppError::storefront("503 Service Unavailable"));
            }
        }
        Ok(updates
            .iter()
            .filter(|u| !self.drop.contains(&u.external_id))
            .map(|u| {
                if self.reject.contains(&u.external_id) {
                    UpdateResult::failed(u.external_id, "invalid product id")
                } else {
                    UpdateResult::ok(u.external_id)
                }
            })
            .collect())
    }
}
