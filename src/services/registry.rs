// src/services/registry.rs

//! Site registry: per-site configuration plus health policy.
//!
//! Holds no network or parsing logic. Health fields change only through
//! [`SiteRegistry::report_outcome`] and [`SiteRegistry::reenable`].

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{Config, SiteConfig, SiteHealth};

/// Health after an outcome was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthChange {
    pub site_name: String,
    pub health: SiteHealth,
    /// The site crossed the failure threshold with this outcome
    pub deactivated: bool,
}

/// Internally synchronized set of site definitions.
#[derive(Debug)]
pub struct SiteRegistry {
    sites: RwLock<Vec<SiteConfig>>,
    failure_threshold: u32,
}

impl SiteRegistry {
    pub fn new(sites: Vec<SiteConfig>, failure_threshold: u32) -> Self {
        Self {
            sites: RwLock::new(sites),
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sites.clone(), config.registry.failure_threshold)
    }

    /// Overlay persisted health onto the configured sites.
    pub fn with_health(self, health: &BTreeMap<String, SiteHealth>) -> Self {
        {
            let mut sites = self.write();
            for site in sites.iter_mut() {
                if let Some(saved) = health.get(&site.name) {
                    site.health = saved.clone();
                }
            }
        }
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<SiteConfig>> {
        self.sites.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<SiteConfig>> {
        self.sites.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Sites that are both active and available, in configuration order.
    pub fn get_active_sites(&self) -> Vec<SiteConfig> {
        self.read()
            .iter()
            .filter(|site| site.is_schedulable())
            .cloned()
            .collect()
    }

    pub fn all_sites(&self) -> Vec<SiteConfig> {
        self.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<SiteConfig> {
        self.read().iter().find(|s| s.name == name).cloned()
    }

    /// Apply a finished session's outcome to the site's health.
    pub fn report_outcome(&self, site_name: &str, success: bool) -> Result<HealthChange> {
        self.report_outcome_at(site_name, success, Utc::now())
    }

    pub fn report_outcome_at(
        &self,
        site_name: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<HealthChange> {
        let mut sites = self.write();
        let site = sites
            .iter_mut()
            .find(|s| s.name == site_name)
            .ok_or_else(|| AppError::config(format!("unknown site '{site_name}'")))?;

        let mut deactivated = false;
        if success {
            site.health.consecutive_failures = 0;
            site.health.last_successful_scrape = Some(at);
            site.health.is_available = true;
        } else {
            site.health.consecutive_failures += 1;
            if site.health.consecutive_failures >= self.failure_threshold
                && site.health.is_available
            {
                site.health.is_available = false;
                deactivated = true;
                log::warn!(
                    "Site {} deactivated after {} consecutive failed sessions",
                    site.name,
                    site.health.consecutive_failures
                );
            }
        }

        Ok(HealthChange {
            site_name: site.name.clone(),
            health: site.health.clone(),
            deactivated,
        })
    }

    /// Manually restore a deactivated site.
    pub fn reenable(&self, site_name: &str) -> Result<SiteHealth> {
        let mut sites = self.write();
        let site = sites
            .iter_mut()
            .find(|s| s.name == site_name)
            .ok_or_else(|| AppError::config(format!("unknown site '{site_name}'")))?;
        site.health.consecutive_failures = 0;
        site.health.is_available = true;
        log::info!("Site {} re-enabled", site.name);
        Ok(site.health.clone())
    }

    /// Current health of every site.
    pub fn health_snapshot(&self) -> BTreeMap<String, SiteHealth> {
        self.read()
            .iter()
            .map(|s| (s.name.clone(), s.health.clone()))
            .collect()
    }
}
