//! Storefront sync records and reports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ProductId;

/// Statistic pushed to the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    #[default]
    Avg,
    Min,
    Max,
}

impl FromStr for PriceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "avg" | "average" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(AppError::config(format!("unknown price type '{other}'"))),
        }
    }
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        })
    }
}

/// Per-product sync classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Applied,
    SkippedUnchanged,
    Failed,
}

/// One product in one sync run. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRecord {
    pub run_id: String,
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<u64>,
    pub requested_price: f64,
    pub price_type: PriceType,
    pub outcome: SyncOutcome,
    pub attempted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Classified without writing to the storefront
    #[serde(default)]
    pub dry_run: bool,
}

/// Overall result of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Succeeded,
    Degraded,
    Failed,
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        })
    }
}

/// Summary of a sync run, produced even when every item fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: String,
    pub price_type: PriceType,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<SyncRecord>,
}

impl SyncReport {
    fn count(&self, outcome: SyncOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn applied(&self) -> usize {
        self.count(SyncOutcome::Applied)
    }

    pub fn skipped(&self) -> usize {
        self.count(SyncOutcome::SkippedUnchanged)
    }

    pub fn failed(&self) -> usize {
        self.count(SyncOutcome::Failed)
    }

    /// Succeeded when nothing failed, degraded when some items failed but
    /// at least one applied, failed otherwise.
    pub fn status(&self) -> SyncRunStatus {
        match (self.failed(), self.applied()) {
            (0, _) => SyncRunStatus::Succeeded,
            (_, 0) => SyncRunStatus::Failed,
            _ => SyncRunStatus::Degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: SyncOutcome) -> SyncRecord {
        SyncRecord {
            run_id: "r".into(),
            product_id: 1,
            external_id: Some(10),
            requested_price: 100.0,
            price_type: PriceType::Avg,
            outcome,
            attempted_at: Utc::now(),
            error_detail: None,
            dry_run: false,
        }
    }

    fn report(outcomes: &[SyncOutcome]) -> SyncReport {
        SyncReport {
            run_id: "r".into(),
            price_type: PriceType::Avg,
            dry_run: false,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            records: outcomes.iter().copied().map(record).collect(),
        }
    }

    #[test]
    fn status_rules() {
        use SyncOutcome::*;
        assert_eq!(report(&[]).status(), SyncRunStatus::Succeeded);
        assert_eq!(
            report(&[SkippedUnchanged, SkippedUnchanged]).status(),
            SyncRunStatus::Succeeded
        );
        assert_eq!(report(&[Applied, Failed]).status(), SyncRunStatus::Degraded);
        assert_eq!(
            report(&[SkippedUnchanged, Failed]).status(),
            SyncRunStatus::Failed
        );
    }

    #[test]
    fn price_type_parse_and_display() {
        assert_eq!("MIN".parse::<PriceType>().unwrap(), PriceType::Min);
        assert_eq!(PriceType::Max.to_string(), "max");
        assert!("median".parse::<PriceType>().is_err());
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&SyncOutcome::SkippedUnchanged).unwrap();
        assert_eq!(json, "\"skipped_unchanged\"");
    }
}
