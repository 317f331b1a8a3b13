//! Structured outcome events handed to the external notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    PriceType, ProductId, ScrapeSession, SessionStatus, SyncReport, SyncRunStatus,
};

/// Event payload. Formatting and delivery live outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    SessionSummary {
        session_id: String,
        site_name: String,
        status: SessionStatus,
        products_found: usize,
        products_scraped: usize,
        prices_extracted: usize,
        errors_count: usize,
        timed_out: bool,
    },
    SiteDeactivated {
        site_name: String,
        consecutive_failures: u32,
        at: DateTime<Utc>,
    },
    PriceAlert {
        product_id: ProductId,
        product_name: String,
        previous_avg: f64,
        current_avg: f64,
        change_percent: f64,
    },
    SyncSummary {
        run_id: String,
        price_type: PriceType,
        dry_run: bool,
        status: SyncRunStatus,
        applied: usize,
        skipped_unchanged: usize,
        failed: usize,
    },
}

impl From<&ScrapeSession> for PipelineEvent {
    fn from(session: &ScrapeSession) -> Self {
        Self::SessionSummary {
            session_id: session.session_id.clone(),
            site_name: session.site_name.clone(),
            status: session.status,
            products_found: session.products_found,
            products_scraped: session.products_scraped,
            prices_extracted: session.prices_extracted,
            errors_count: session.errors_count,
            timed_out: session.timed_out,
        }
    }
}

impl From<&SyncReport> for PipelineEvent {
    fn from(report: &SyncReport) -> Self {
        Self::SyncSummary {
            run_id: report.run_id.clone(),
            price_type: report.price_type,
            dry_run: report.dry_run,
            status: report.status(),
            applied: report.applied(),
            skipped_unchanged: report.skipped(),
            failed: report.failed(),
        }
    }
}

impl PipelineEvent {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionSummary { .. } => "session_summary",
            Self::SiteDeactivated { .. } => "site_deactivated",
            Self::PriceAlert { .. } => "price_alert",
            Self::SyncSummary { .. } => "sync_summary",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_is_internally_tagged() {
        let event = PipelineEvent::SiteDeactivated {
            site_name: "a.com".into(),
            consecutive_failures: 3,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "site_deactivated");
        assert_eq!(json["consecutive_failures"], 3);
    }
}
