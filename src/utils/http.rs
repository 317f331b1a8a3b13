// src/utils/http.rs

//! HTTP client utilities and the page fetching seam used by the scraper.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{CrawlerConfig, SiteAuth};
use crate::services::proxy::ProxyEndpoint;

/// Browser agents used when `rotate_user_agents` is enabled.
const BROWSER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

/// A single page request.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    pub proxy: Option<ProxyEndpoint>,
    pub user_agent: Option<String>,
    pub auth: Option<SiteAuth>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Fetches raw page bodies.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Return the body of a successful response.
    ///
    /// Network failures map to `AppError::TransientFetch`, non-success
    /// statuses to `AppError::HttpStatus`.
    async fn fetch(&self, request: &FetchRequest) -> Result<String>;
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &CrawlerConfig, proxy: Option<&ProxyEndpoint>) -> Result<Client> {
    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs));

    if let Some(endpoint) = proxy {
        let mut proxy = reqwest::Proxy::all(endpoint.proxy_url())?;
        if let Some((username, password)) = endpoint.credentials() {
            proxy = proxy.basic_auth(username, password);
        }
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// `PageFetcher` backed by reqwest, with one client per proxy endpoint.
pub struct HttpFetcher {
    config: CrawlerConfig,
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl HttpFetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self {
            direct: create_async_client(config, None)?,
            config: config.clone(),
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client> {
        let Some(endpoint) = proxy else {
            return Ok(self.direct.clone());
        };
        let mut clients = self
            .proxied
            .lock()
            .map_err(|_| AppError::fetch(endpoint.address(), "proxy client cache poisoned"))?;
        if let Some(client) = clients.get(&endpoint.address()) {
            return Ok(client.clone());
        }
        let client = create_async_client(&self.config, Some(endpoint))?;
        clients.insert(endpoint.address(), client.clone());
        Ok(client)
    }

    fn user_agent(&self, request: &FetchRequest) -> Option<String> {
        if let Some(agent) = &request.user_agent {
            return Some(agent.clone());
        }
        if self.config.rotate_user_agents {
            return Some(BROWSER_AGENTS[fastrand::usize(..BROWSER_AGENTS.len())].to_string());
        }
        None
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String> {
        let client = self.client_for(request.proxy.as_ref())?;
        let mut builder = client.get(&request.url);

        if let Some(agent) = self.user_agent(request) {
            builder = builder.header(reqwest::header::USER_AGENT, agent);
        }
        builder = match &request.auth {
            Some(SiteAuth::Bearer { token }) => builder.bearer_auth(token),
            Some(SiteAuth::Basic { username, password }) => {
                builder.basic_auth(username, password.as_ref())
            }
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| classify(&request.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| classify(&request.url, e))
    }
}

fn classify(url: &str, error: reqwest::Error) -> AppError {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        AppError::fetch(url, error)
    } else {
        AppError::Http(error)
    }
}
