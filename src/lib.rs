//! Listing-Harvester: a polite, resumable listing crawler
//!
//! This crate walks region-hierarchical listing sites (district → county →
//! paginated listing), extracts one flat record per listing through a
//! declarative field mapping, and appends each record exactly once to a
//! newline-delimited JSON file. Progress is checkpointed per page so an
//! interrupted crawl resumes where it stopped.

pub mod config;
pub mod crawler;
pub mod output;
pub mod site;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Listing-Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Walk error: {0}")]
    Walk(#[from] WalkError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::DriverPhase,
        to: state::DriverPhase,
    },

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Unknown site adapter: {0}")]
    UnknownSite(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors raised while fetching a single URL
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Returns the URL the failed request was aimed at
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url }
            | Self::HttpStatus { url, .. }
            | Self::Network { url, .. }
            | Self::Exhausted { url, .. } => url,
        }
    }
}

/// Errors raised while turning markup into records
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Required field '{field}' is missing")]
    MissingRequiredField { field: String },

    #[error("Malformed markup: {0}")]
    MalformedMarkup(String),

    #[error("Invalid selector '{selector}'")]
    InvalidSelector { selector: String },
}

/// Errors raised while walking the region hierarchy
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("No districts found at {url}")]
    NoDistricts { url: String },

    #[error("Page count indicator missing for {region}")]
    PageCountUnknown { region: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Errors raised by the record sink; always fatal to a run
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Output IO failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("State store failure: {0}")]
    Store(#[from] storage::StorageError),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Listing-Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use site::{FieldValue, PageCount, PartialRecord, Record, Region, SiteAdapter};
pub use state::{Checkpoint, CrawlState, DriverPhase};
