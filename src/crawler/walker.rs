//! Region walker: district → county → paginated listing
//!
//! Every call re-issues its fetch, so a walk can be restarted at any level.

use crate::config::CrawlConfig;
use crate::crawler::fetcher::Fetcher;
use crate::site::{PageCount, Region, SiteAdapter};
use crate::WalkError;
use async_trait::async_trait;
use std::sync::Arc;

/// Navigation over a site's region hierarchy
#[async_trait]
pub trait Walker: Send + Sync {
    /// Lists the top-level districts in site order
    async fn list_districts(&self) -> Result<Vec<Region>, WalkError>;

    /// Lists the counties of one district in site order
    async fn list_counties(&self, district: &Region) -> Result<Vec<Region>, WalkError>;

    /// Reads how many listing pages a county has
    ///
    /// A missing indicator is `PageCount::Unknown`, not an error.
    async fn page_count(&self, county: &Region) -> Result<PageCount, WalkError>;
}

/// Walker that fetches region pages and lets a site adapter read them
pub struct RegionWalker {
    fetcher: Arc<Fetcher>,
    adapter: Arc<dyn SiteAdapter>,
    districts: Vec<String>,
    counties: Vec<String>,
}

impl RegionWalker {
    pub fn new(fetcher: Arc<Fetcher>, adapter: Arc<dyn SiteAdapter>) -> Self {
        Self {
            fetcher,
            adapter,
            districts: Vec::new(),
            counties: Vec::new(),
        }
    }

    /// Restricts the walk to the districts and counties named in the config
    pub fn with_filters(mut self, crawl: &CrawlConfig) -> Self {
        self.districts = crawl.districts.clone();
        self.counties = crawl.counties.clone();
        self
    }
}

#[async_trait]
impl Walker for RegionWalker {
    async fn list_districts(&self) -> Result<Vec<Region>, WalkError> {
        let entry = self.adapter.entry_url();
        let markup = self.fetcher.fetch(&entry).await?;
        let found = self.adapter.parse_districts(&markup)?;

        let districts = keep_named(found, &self.districts);
        if districts.is_empty() {
            return Err(WalkError::NoDistricts { url: entry });
        }

        tracing::info!(count = districts.len(), "Districts found");
        Ok(districts)
    }

    async fn list_counties(&self, district: &Region) -> Result<Vec<Region>, WalkError> {
        let markup = self.fetcher.fetch(&district.locator).await?;
        let found = self.adapter.parse_counties(district, &markup)?;
        let counties = keep_named(found, &self.counties);

        tracing::info!(district = %district.name, count = counties.len(), "Counties found");
        Ok(counties)
    }

    async fn page_count(&self, county: &Region) -> Result<PageCount, WalkError> {
        let markup = self.fetcher.fetch(&county.locator).await?;
        Ok(self.adapter.parse_page_count(&markup))
    }
}

/// Keeps regions whose name is in `names`; an empty filter keeps everything
fn keep_named(regions: Vec<Region>, names: &[String]) -> Vec<Region> {
    if names.is_empty() {
        return regions;
    }
    regions
        .into_iter()
        .filter(|region| names.iter().any(|name| name == &region.name))
        .collect()
}
