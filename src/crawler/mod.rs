//! Crawler module for fetching, walking and extracting listings
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retries and header rotation
//! - Walking the district → county → page hierarchy
//! - Declarative field extraction from markup
//! - Page scheduling and request pacing
//! - Overall crawl coordination

mod coordinator;
mod fetcher;
pub mod parser;
mod scheduler;
mod walker;

pub use coordinator::{Coordinator, PhaseTracker};
pub use fetcher::{build_http_client, FetchOptions, Fetcher};
pub use scheduler::{PageTask, RateLimiter, Scheduler, StallPause, StallTimer};
pub use walker::{RegionWalker, Walker};

use crate::config::Config;
use crate::output::CrawlSummary;
use crate::HarvestError;
use tokio::sync::watch;

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the state store and reconcile it with the output file
/// 2. Start a run, resuming from checkpoints when the last one is unfinished
/// 3. Walk districts and counties and crawl their listing pages
/// 4. Record the run's final status
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `config_hash` - Hash of the config file
/// * `fresh` - Forget earlier progress first
/// * `cancel` - Turns true when the crawl should stop
pub async fn run_crawl(
    config: Config,
    config_hash: String,
    fresh: bool,
    cancel: watch::Receiver<bool>,
) -> Result<CrawlSummary, HarvestError> {
    Coordinator::new(config, config_hash, fresh)?
        .with_cancellation(cancel)
        .run()
        .await
}
