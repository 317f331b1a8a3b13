// src/error.rs

//! Unified error handling for the price monitor.

use std::fmt;

use thiserror::Error;

/// Result type alias for price monitor operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSV export failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or out-of-range data (negative or absurd price)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network failure or timeout while fetching a page
    #[error("Fetch failed for {url}: {message}")]
    TransientFetch { url: String, message: String },

    /// Non-success HTTP status
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// Selector matched nothing or the value could not be read
    #[error("Parse error on {site}: {message}")]
    Parse { site: String, message: String },

    /// No proxy endpoint available
    #[error("Proxy pool exhausted: {0}")]
    ProxyExhausted(String),

    /// Site requires credentials that are not configured
    #[error("Site {0} requires auth but none is configured")]
    AuthRequired(String),

    /// Storefront rejected an update or could not be reached
    #[error("Storefront error: {0}")]
    Storefront(String),

    /// Persistent store error
    #[error("Store error: {0}")]
    Store(String),

    /// Work cancelled by timeout or shutdown
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a parse error for a site.
    pub fn parse(site: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            site: site.into(),
            message: message.to_string(),
        }
    }

    /// Create a transient fetch error.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::TransientFetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a storefront error.
    pub fn storefront(message: impl fmt::Display) -> Self {
        Self::Storefront(message.to_string())
    }

    /// Create a store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientFetch { .. } => true,
            Self::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Stable label used in session error breakdowns.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Http(_) | Self::TransientFetch { .. } => "transient_fetch",
            Self::HttpStatus { .. } => "http_status",
            Self::Json(_) | Self::Toml(_) | Self::TomlSerialize(_) | Self::Csv(_) => "serialization",
            Self::Url(_) | Self::Selector { .. } | Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Parse { .. } => "parse",
            Self::ProxyExhausted(_) => "proxy_exhausted",
            Self::AuthRequired(_) => "auth_required",
            Self::Storefront(_) => "storefront",
            Self::Store(_) => "store",
            Self::Cancelled(_) => "cancelled",
        }
    }
}
