// src/services/proxy.rs

//! Egress proxy pool with least-recently-used rotation and quarantine.
//!
//! An endpoint that fails `failure_threshold` consecutive times is
//! quarantined for `cooldown_secs`. The quarantine doubles each time the
//! endpoint is re-quarantined without an intervening success, capped at
//! `max_cooldown_secs`. After the cooldown the endpoint is handed out again;
//! one more failure sends it straight back to quarantine.

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{AppError, Result};
use crate::models::ProxyConfig;

/// A proxy endpoint parsed from `host:port` or `user:pass@host:port`.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    scheme: String,
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

impl ProxyEndpoint {
    /// Parse an endpoint string, with an optional `http://` or `https://` scheme.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => ("http".to_string(), raw),
        };
        if scheme != "http" && scheme != "https" {
            return Err(AppError::config(format!(
                "unsupported proxy scheme '{scheme}' in {raw}"
            )));
        }

        let (credentials, address) = match rest.rsplit_once('@') {
            Some((creds, address)) => (Some(creds), address),
            None => (None, rest),
        };
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| AppError::config(format!("proxy '{raw}' is missing a port")))?;
        if host.is_empty() {
            return Err(AppError::config(format!("proxy '{raw}' is missing a host")));
        }
        let port = port
            .trim_end_matches('/')
            .parse::<u16>()
            .map_err(|e| AppError::config(format!("proxy '{raw}' has a bad port: {e}")))?;

        let (username, password) = match credentials {
            Some(creds) => {
                let (user, pass) = creds.split_once(':').unwrap_or((creds, ""));
                (Some(user.to_string()), Some(pass.to_string()))
            }
            None => (None, None),
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            username,
            password,
        })
    }

    /// `host:port`, used as the endpoint identity.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URL without credentials.
    pub fn proxy_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref().unwrap_or("")))
    }
}

// Credentials never reach logs.
impl fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("url", &self.proxy_url())
            .field("auth", &self.username.is_some())
            .finish()
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

#[derive(Debug)]
struct ProxyState {
    endpoint: ProxyEndpoint,
    consecutive_failures: u32,
    quarantines: u32,
    last_used: Option<Instant>,
    quarantined_until: Option<Instant>,
}

impl ProxyState {
    fn is_working(&self, now: Instant) -> bool {
        self.quarantined_until.is_none_or(|until| until <= now)
    }
}

/// Point-in-time view of one endpoint.
#[derive(Debug, Clone)]
pub struct ProxyStatus {
    pub address: String,
    pub consecutive_failures: u32,
    pub quarantined_for: Option<Duration>,
}

/// Shared, internally synchronized proxy pool.
#[derive(Debug)]
pub struct ProxyPool {
    entries: Mutex<Vec<ProxyState>>,
    failure_threshold: u32,
    cooldown: Duration,
    max_cooldown: Duration,
}

impl ProxyPool {
    /// Create a pool from parsed endpoints.
    pub fn new(endpoints: Vec<ProxyEndpoint>, config: &ProxyConfig) -> Self {
        let entries = endpoints
            .into_iter()
            .map(|endpoint| ProxyState {
                endpoint,
                consecutive_failures: 0,
                quarantines: 0,
                last_used: None,
                quarantined_until: None,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
            max_cooldown: Duration::from_secs(config.max_cooldown_secs.max(config.cooldown_secs)),
        }
    }

    /// Build the pool described by `[proxy]`. Disabled means empty.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let endpoints = if config.enabled {
            config
                .endpoints
                .iter()
                .map(|raw| ProxyEndpoint::parse(raw))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };
        Ok(Self::new(endpoints, config))
    }

    /// An empty pool that always reports exhaustion.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), &ProxyConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProxyState>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Hand out the least recently used working endpoint.
    pub fn acquire(&self) -> Result<ProxyEndpoint> {
        self.acquire_at(Instant::now())
    }

    pub fn acquire_at(&self, now: Instant) -> Result<ProxyEndpoint> {
        let mut entries = self.lock();
        let total = entries.len();
        let chosen = entries
            .iter_mut()
            .filter(|state| state.is_working(now))
            .min_by_key(|state| state.last_used);

        match chosen {
            Some(state) => {
                if state.quarantined_until.take().is_some() {
                    log::debug!("Proxy {} back from quarantine", state.endpoint);
                }
                state.last_used = Some(now);
                Ok(state.endpoint.clone())
            }
            None if total == 0 => Err(AppError::ProxyExhausted(
                "no proxy endpoints configured".into(),
            )),
            None => Err(AppError::ProxyExhausted(format!(
                "all {total} endpoints quarantined"
            ))),
        }
    }

    /// Report how a request through `endpoint` went.
    pub fn release(&self, endpoint: &ProxyEndpoint, success: bool) {
        self.release_at(endpoint, success, Instant::now());
    }

    pub fn release_at(&self, endpoint: &ProxyEndpoint, success: bool, now: Instant) {
        let mut entries = self.lock();
        let Some(state) = entries.iter_mut().find(|s| s.endpoint == *endpoint) else {
            return;
        };

        if success {
            state.consecutive_failures = 0;
            state.quarantines = 0;
            return;
        }

        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold && state.is_working(now) {
            let factor = 2u32.saturating_pow(state.quarantines.min(16));
            let cooldown = self.cooldown.saturating_mul(factor).min(self.max_cooldown);
            state.quarantined_until = Some(now + cooldown);
            state.quarantines += 1;
            log::warn!(
                "Proxy {} quarantined for {}s after {} consecutive failures",
                state.endpoint,
                cooldown.as_secs(),
                state.consecutive_failures
            );
        }
    }

    /// Snapshot of every endpoint.
    pub fn status(&self) -> Vec<ProxyStatus> {
        let now = Instant::now();
        self.lock()
            .iter()
            .map(|state| ProxyStatus {
                address: state.endpoint.address(),
                consecutive_failures: state.consecutive_failures,
                quarantined_for: state
                    .quarantined_until
                    .filter(|until| *until > now)
                    .map(|until| until - now),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProxyConfig {
        ProxyConfig {
            enabled: true,
            endpoints: Vec::new(),
            failure_threshold: 3,
            cooldown_secs: 300,
            max_cooldown_secs: 1000,
        }
    }

    fn pool(addresses: &[&str]) -> ProxyPool {
        let endpoints = addresses
            .iter()
            .map(|a| ProxyEndpoint::parse(a).unwrap())
            .collect();
        ProxyPool::new(endpoints, &config())
    }

    #[test]
    fn parse_formats() {
        let plain = ProxyEndpoint::parse("10.0.0.1:8080").unwrap();
        assert_eq!(plain.address(), "10.0.0.1:8080");
        assert_eq!(plain.proxy_url(), "http://10.0.0.1:8080");
        assert!(plain.credentials().is_none());

        let auth = ProxyEndpoint::parse("user:secret@proxy.example:3128").unwrap();
        assert_eq!(auth.credentials(), Some(("user", "secret")));
        assert!(!format!("{auth:?}").contains("secret"));

        let https = ProxyEndpoint::parse("https://proxy.example:443").unwrap();
        assert_eq!(https.proxy_url(), "https://proxy.example:443");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(ProxyEndpoint::parse("no-port").is_err());
        assert!(ProxyEndpoint::parse("host:notaport").is_err());
        assert!(ProxyEndpoint::parse("socks5://host:1080").is_err());
        assert!(ProxyEndpoint::parse(":8080").is_err());
    }

    #[test]
    fn empty_pool_is_exhausted() {
        let pool = ProxyPool::disabled();
        assert!(matches!(pool.acquire(), Err(AppError::ProxyExhausted(_))));
    }

    #[test]
    fn rotation_prefers_least_recently_used() {
        let pool = pool(&["a:1", "b:2", "c:3"]);
        let t0 = Instant::now();
        let first = pool.acquire_at(t0).unwrap();
        let second = pool.acquire_at(t0 + Duration::from_millis(1)).unwrap();
        let third = pool.acquire_at(t0 + Duration::from_millis(2)).unwrap();
        let fourth = pool.acquire_at(t0 + Duration::from_millis(3)).unwrap();
        assert_eq!(first.address(), "a:1");
        assert_eq!(second.address(), "b:2");
        assert_eq!(third.address(), "c:3");
        assert_eq!(fourth.address(), "a:1");
    }

    #[test]
    fn quarantine_after_k_failures_and_recovery() {
        let pool = pool(&["a:1"]);
        let t0 = Instant::now();
        let endpoint = pool.acquire_at(t0).unwrap();

        pool.release_at(&endpoint, false, t0);
        pool.release_at(&endpoint, false, t0);
        assert!(pool.acquire_at(t0).is_ok());
        pool.release_at(&endpoint, false, t0);

        assert!(matches!(
            pool.acquire_at(t0 + Duration::from_secs(299)),
            Err(AppError::ProxyExhausted(_))
        ));
        assert!(pool.acquire_at(t0 + Duration::from_secs(300)).is_ok());
    }

    #[test]
    fn requarantine_doubles_up_to_cap() {
        let pool = pool(&["a:1"]);
        let endpoint = ProxyEndpoint::parse("a:1").unwrap();
        let t0 = Instant::now();
        for _ in 0..3 {
            pool.release_at(&endpoint, false, t0);
        }

        // Back after 300s, one failure re-quarantines for 600s.
        let t1 = t0 + Duration::from_secs(300);
        pool.acquire_at(t1).unwrap();
        pool.release_at(&endpoint, false, t1);
        assert!(pool.acquire_at(t1 + Duration::from_secs(599)).is_err());
        let t2 = t1 + Duration::from_secs(600);
        pool.acquire_at(t2).unwrap();

        // Third quarantine would be 1200s, capped at 1000s.
        pool.release_at(&endpoint, false, t2);
        assert!(pool.acquire_at(t2 + Duration::from_secs(999)).is_err());
        assert!(pool.acquire_at(t2 + Duration::from_secs(1000)).is_ok());
    }

    #[test]
    fn success_resets_failures() {
        let pool = pool(&["a:1"]);
        let endpoint = ProxyEndpoint::parse("a:1").unwrap();
        let t0 = Instant::now();
        pool.release_at(&endpoint, false, t0);
        pool.release_at(&endpoint, false, t0);
        pool.release_at(&endpoint, true, t0);
        pool.release_at(&endpoint, false, t0);
        assert!(pool.acquire_at(t0).is_ok());
        assert_eq!(pool.status()[0].consecutive_failures, 1);
    }

    #[test]
    fn disabled_config_yields_empty_pool() {
        let mut cfg = config();
        cfg.enabled = false;
        cfg.endpoints = vec!["a:1".into()];
        assert!(ProxyPool::from_config(&cfg).unwrap().is_empty());
        cfg.enabled = true;
        assert_eq!(ProxyPool::from_config(&cfg).unwrap().len(), 1);
    }
}
