//! Aggregated price statistics.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{PriceObservation, PriceType, ProductId};

/// Aggregation window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Period {
    /// Every observation produced by one scrape run
    Run(String),
    /// Every observation made on one UTC calendar day
    Day(NaiveDate),
}

impl Period {
    /// Stable key used for upserts.
    pub fn key(&self) -> String {
        match self {
            Self::Run(id) => format!("run:{id}"),
            Self::Day(date) => format!("day:{date}"),
        }
    }

    /// Whether an observation falls in this window.
    pub fn contains(&self, obs: &PriceObservation) -> bool {
        match self {
            Self::Run(id) => obs.run_id == *id,
            Self::Day(date) => obs.observed_at.date_naive() == *date,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Which window the aggregator uses when none is given explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    #[default]
    Run,
    Daily,
}

impl FromStr for PeriodKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "run" => Ok(Self::Run),
            "daily" | "day" => Ok(Self::Daily),
            other => Err(AppError::config(format!("unknown period '{other}'"))),
        }
    }
}

/// Per-product, per-period statistics. Only written when `sample_count > 0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSummary {
    pub product_id: ProductId,
    pub period: Period,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub median_price: f64,
    pub sample_count: usize,
    /// Valid samples dropped as outliers
    #[serde(default)]
    pub outliers_excluded: usize,
    /// Newest observation behind this summary. Orders periods by recency.
    #[serde(default)]
    pub observed_until: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
}

impl PriceSummary {
    /// The statistic selected by `price_type`.
    pub fn price(&self, price_type: PriceType) -> f64 {
        match price_type {
            PriceType::Avg => self.avg_price,
            PriceType::Min => self.min_price,
            PriceType::Max => self.max_price,
        }
    }

    /// Whether this summary describes more recent data than `other`.
    /// Recomputing an old period never makes it newer.
    pub fn is_newer_than(&self, other: &PriceSummary) -> bool {
        (self.observed_until, self.computed_at) >= (other.observed_until, other.computed_at)
    }

    /// `min <= avg <= max` with at least one sample.
    pub fn is_consistent(&self) -> bool {
        self.sample_count > 0
            && self.min_price <= self.avg_price
            && self.avg_price <= self.max_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_keys() {
        assert_eq!(Period::Run("abc".into()).key(), "run:abc");
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(Period::Day(day).key(), "day:2026-03-01");
    }

    #[test]
    fn day_period_matches_observed_date() {
        let obs = PriceObservation::new(1, "a", 10.0, "IRR", true, Utc::now(), "r1", "s").unwrap();
        assert!(Period::Day(obs.observed_at.date_naive()).contains(&obs));
        assert!(Period::Run("r1".into()).contains(&obs));
        assert!(!Period::Run("r2".into()).contains(&obs));
    }

    #[test]
    fn period_kind_parse() {
        assert_eq!("daily".parse::<PeriodKind>().unwrap(), PeriodKind::Daily);
        assert!("weekly".parse::<PeriodKind>().is_err());
    }
}
