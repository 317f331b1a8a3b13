//! Scrape session state machine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Lifecycle of a scrape session: pending → running → completed | failed | partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Partial)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
        };
        f.write_str(s)
    }
}

/// Outcome record for one site in one scrape run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeSession {
    pub session_id: String,
    pub run_id: String,
    pub site_name: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Items queued: product pages, or tracked cards found on listing pages
    pub products_found: usize,
    /// Items that were fetched and parsed without error
    pub products_scraped: usize,
    /// Observations kept after de-duplication
    pub prices_extracted: usize,
    pub errors_count: usize,
    /// Failed items by error kind
    #[serde(default)]
    pub error_breakdown: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Finalized early by the session deadline
    #[serde(default)]
    pub timed_out: bool,
    /// Finalized early by a shutdown signal
    #[serde(default)]
    pub interrupted: bool,
    /// Aborted for a reason outside the site's control (proxy exhaustion)
    #[serde(default)]
    pub infrastructure_failure: bool,
}

impl ScrapeSession {
    /// Create a pending session.
    pub fn new(site_name: impl Into<String>, run_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let site_name = site_name.into();
        let run_id = run_id.into();
        Self {
            session_id: session_id(&site_name, &run_id, now),
            run_id,
            site_name,
            status: SessionStatus::Pending,
            started_at: now,
            ended_at: None,
            products_found: 0,
            products_scraped: 0,
            prices_extracted: 0,
            errors_count: 0,
            error_breakdown: BTreeMap::new(),
            error_message: None,
            timed_out: false,
            interrupted: false,
            infrastructure_failure: false,
        }
    }

    /// Pending → running, on the first request issued.
    pub fn start(&mut self) {
        if self.status == SessionStatus::Pending {
            self.status = SessionStatus::Running;
        }
    }

    pub fn record_success(&mut self) {
        self.products_scraped += 1;
    }

    pub fn record_failure(&mut self, error: &AppError) {
        self.errors_count += 1;
        *self
            .error_breakdown
            .entry(error.kind().to_string())
            .or_default() += 1;
        if self.error_message.is_none() {
            self.error_message = Some(error.to_string());
        }
    }

    /// Close the session, deriving the status from its counters.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> SessionStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        self.status = if self.errors_count == 0 {
            SessionStatus::Completed
        } else if self.products_scraped == 0 {
            SessionStatus::Failed
        } else {
            SessionStatus::Partial
        };
        self.ended_at = Some(now);
        self.status
    }

    /// Close the session as failed without running any job.
    pub fn fail(&mut self, error: &AppError, now: DateTime<Utc>) {
        self.record_failure(error);
        self.status = SessionStatus::Failed;
        self.ended_at = Some(now);
    }

    /// Success as seen by the site registry.
    pub fn is_success(&self) -> bool {
        self.status != SessionStatus::Failed
    }

    /// Whether the outcome says something about the site's own health.
    pub fn counts_towards_health(&self) -> bool {
        !self.infrastructure_failure && !self.interrupted
    }
}

fn session_id(site_name: &str, run_id: &str, now: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site_name.as_bytes());
    hasher.update(run_id.as_bytes());
    hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ScrapeSession {
        let mut s = ScrapeSession::new("a.com", "run1", Utc::now());
        s.start();
        s
    }

    #[test]
    fn empty_session_completes() {
        let mut s = session();
        assert_eq!(s.finalize(Utc::now()), SessionStatus::Completed);
        assert!(s.ended_at.is_some());
    }

    #[test]
    fn mixed_results_are_partial() {
        let mut s = session();
        s.record_success();
        s.record_failure(&AppError::parse("a.com", "no price"));
        assert_eq!(s.finalize(Utc::now()), SessionStatus::Partial);
        assert!(s.is_success());
        assert_eq!(s.error_breakdown.get("parse"), Some(&1));
    }

    #[test]
    fn all_failures_fail() {
        let mut s = session();
        s.record_failure(&AppError::fetch("u", "timeout"));
        s.record_failure(&AppError::fetch("u", "timeout"));
        assert_eq!(s.finalize(Utc::now()), SessionStatus::Failed);
        assert!(!s.is_success());
        assert_eq!(s.errors_count, 2);
    }

    #[test]
    fn start_only_moves_from_pending() {
        let mut s = ScrapeSession::new("a.com", "run1", Utc::now());
        assert_eq!(s.status, SessionStatus::Pending);
        s.start();
        assert_eq!(s.status, SessionStatus::Running);
        s.fail(&AppError::AuthRequired("a.com".into()), Utc::now());
        s.start();
        assert_eq!(s.status, SessionStatus::Failed);
        assert_eq!(s.finalize(Utc::now()), SessionStatus::Failed);
    }

    #[test]
    fn session_ids_differ_per_site() {
        let now = Utc::now();
        let a = ScrapeSession::new("a.com", "run1", now);
        let b = ScrapeSession::new("b.com", "run1", now);
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.session_id.len(), 16);
    }
}
