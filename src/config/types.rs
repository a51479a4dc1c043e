use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for Listing-Harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    pub output: OutputConfig,
}

/// What to crawl
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// Site adapter name ("lianjia" or "aqi")
    pub site: String,

    /// City abbreviation (lianjia) or city name (aqi)
    pub city: String,

    /// Listing category, e.g. "chengjiao", "xiaoqu", "ershoufang", "daily"
    pub category: String,

    /// Human-readable city name written into records
    #[serde(default)]
    pub city_name: Option<String>,

    /// Overrides the adapter's default site root
    #[serde(default)]
    pub base_url: Option<String>,

    /// First listing page to crawl in every county (1-based)
    #[serde(default = "default_start_page")]
    pub start_page: u32,

    /// Last listing page to crawl in every county
    #[serde(default)]
    pub stop_page: Option<u32>,

    /// Only walk districts with these names (empty = all)
    #[serde(default)]
    pub districts: Vec<String>,

    /// Only walk counties with these names (empty = all)
    #[serde(default)]
    pub counties: Vec<String>,

    /// First month (YYYYMM) for date-ranged sites
    #[serde(default)]
    pub start_month: Option<String>,

    /// Last month (YYYYMM) for date-ranged sites
    #[serde(default)]
    pub stop_month: Option<String>,
}

/// Backoff strategy between fetch attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// HTTP fetch behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetcherConfig {
    /// Total number of attempts per URL
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the second attempt (milliseconds)
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Upper bound for exponential backoff (milliseconds)
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay: u64,

    #[serde(default = "default_backoff")]
    pub backoff: Backoff,

    /// Per-request timeout (milliseconds)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// User-agent pool; a built-in pool is used when empty
    #[serde(default)]
    pub user_agents: Vec<String>,
}

/// Politeness and concurrency
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PacingConfig {
    /// Minimum spacing between requests across all workers (milliseconds)
    #[serde(default = "default_delay")]
    pub delay: u64,

    /// Requests that may be issued back to back before pacing applies
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Number of concurrent page workers
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Busy time after which a page task is abandoned and requeued once
    /// (milliseconds); waiting for the rate limiter or a retry backoff does
    /// not count
    #[serde(default = "default_page_timeout")]
    pub page_timeout: u64,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Directory receiving the JSON-lines output
    pub directory: String,

    /// Path to the SQLite state store (defaults to `<directory>/crawl-state.db`)
    #[serde(default)]
    pub state_path: Option<String>,

    /// Path to the markdown run summary (not written when absent)
    #[serde(default)]
    pub summary_path: Option<String>,
}

fn default_start_page() -> u32 {
    1
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_max_retry_delay() -> u64 {
    30_000
}

fn default_backoff() -> Backoff {
    Backoff::Fixed
}

fn default_timeout() -> u64 {
    30_000
}

fn default_delay() -> u64 {
    4000
}

fn default_burst() -> u32 {
    1
}

fn default_workers() -> u32 {
    1
}

fn default_page_timeout() -> u64 {
    300_000
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            max_retry_delay: default_max_retry_delay(),
            backoff: default_backoff(),
            timeout: default_timeout(),
            user_agents: Vec::new(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay: default_delay(),
            burst: default_burst(),
            workers: default_workers(),
            page_timeout: default_page_timeout(),
        }
    }
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub city: Option<String>,
    pub category: Option<String>,
    pub start_page: Option<u32>,
    pub stop_page: Option<u32>,
    pub start_month: Option<String>,
    pub stop_month: Option<String>,
    pub output_dir: Option<String>,
    pub workers: Option<u32>,
    pub delay: Option<u64>,
}

impl Config {
    /// Applies command-line overrides on top of the file values
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(city) = overrides.city {
            self.crawl.city = city;
        }
        if let Some(category) = overrides.category {
            self.crawl.category = category;
        }
        if let Some(page) = overrides.start_page {
            self.crawl.start_page = page;
        }
        if overrides.stop_page.is_some() {
            self.crawl.stop_page = overrides.stop_page;
        }
        if overrides.start_month.is_some() {
            self.crawl.start_month = overrides.start_month;
        }
        if overrides.stop_month.is_some() {
            self.crawl.stop_month = overrides.stop_month;
        }
        if let Some(dir) = overrides.output_dir {
            self.output.directory = dir;
        }
        if let Some(workers) = overrides.workers {
            self.pacing.workers = workers;
        }
        if let Some(delay) = overrides.delay {
            self.pacing.delay = delay;
        }
    }

    /// Identity shared by all runs of the same crawl: `site:city:category`
    pub fn crawl_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.crawl.site, self.crawl.city, self.crawl.category
        )
    }

    /// Path of the JSON-lines output file
    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output.directory).join(format!(
            "{}_{}_{}.jsonl",
            self.crawl.site, self.crawl.city, self.crawl.category
        ))
    }

    /// Path of the SQLite state store
    pub fn state_path(&self) -> PathBuf {
        match &self.output.state_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.output.directory).join("crawl-state.db"),
        }
    }
}
