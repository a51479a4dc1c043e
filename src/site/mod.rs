//! Site adapters
//!
//! A site adapter holds everything that is specific to one website: where the
//! region hierarchy starts, how regions, page counts and listings are read
//! from markup, and which fields make up a record. Adapters never perform I/O;
//! the walker and the crawl driver feed them markup.

pub mod aqi;
pub mod lianjia;
mod types;

pub use types::{FieldValue, PageCount, PageCursor, PartialRecord, Record, Region, SOURCE_URL_KEY};

use crate::config::Config;
use crate::{ExtractError, HarvestError, WalkError};
use std::sync::Arc;

/// Per-site navigation and extraction interface consumed by the crawl driver
pub trait SiteAdapter: Send + Sync {
    /// Short adapter name used in crawl identities and output file names
    fn name(&self) -> &str;

    /// URL of the page listing the top-level districts
    fn entry_url(&self) -> String;

    /// Reads the district list from the entry page
    fn parse_districts(&self, markup: &str) -> Result<Vec<Region>, WalkError>;

    /// Reads the county list from a district's landing page
    fn parse_counties(&self, district: &Region, markup: &str) -> Result<Vec<Region>, WalkError>;

    /// Reads the number of listing pages from a county's first page
    fn parse_page_count(&self, markup: &str) -> PageCount;

    /// URL of listing page `page` (1-based) within a county
    fn page_url(&self, county: &Region, page: u32) -> String;

    /// Extracts listing stubs from one listing page
    fn extract_listing(
        &self,
        page_url: &str,
        markup: &str,
    ) -> Result<Vec<PartialRecord>, ExtractError>;

    /// Completes a stub from its detail page
    fn extract_detail(&self, markup: &str, partial: PartialRecord) -> Result<Record, ExtractError>;
}

/// Builds the adapter named by `crawl.site`
pub fn build_adapter(config: &Config) -> Result<Arc<dyn SiteAdapter>, HarvestError> {
    match config.crawl.site.as_str() {
        lianjia::SITE_NAME => Ok(Arc::new(lianjia::LianjiaAdapter::from_config(&config.crawl)?)),
        aqi::SITE_NAME => Ok(Arc::new(aqi::AqiAdapter::from_config(&config.crawl)?)),
        other => Err(HarvestError::UnknownSite(other.to_string())),
    }
}
