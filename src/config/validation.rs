use crate::config::types::{Config, CrawlConfig, FetcherConfig, OutputConfig, PacingConfig};
use crate::site::{aqi, lianjia};
use crate::ConfigError;
use chrono::NaiveDate;
use url::Url;

/// Largest worker pool accepted; the target sites are small and shared
const MAX_WORKERS: u32 = 8;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_pacing_config(&config.pacing, &config.fetcher)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates the crawl target
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.city.trim().is_empty() {
        return Err(ConfigError::Validation("city cannot be empty".to_string()));
    }

    let categories: &[&str] = match config.site.as_str() {
        lianjia::SITE_NAME => lianjia::CATEGORIES,
        aqi::SITE_NAME => aqi::CATEGORIES,
        other => {
            return Err(ConfigError::Validation(format!(
                "unknown site '{}', expected '{}' or '{}'",
                other,
                lianjia::SITE_NAME,
                aqi::SITE_NAME
            )))
        }
    };

    if !categories.contains(&config.category.as_str()) {
        return Err(ConfigError::Validation(format!(
            "category '{}' is not supported by site '{}' (expected one of {:?})",
            config.category, config.site, categories
        )));
    }

    if let Some(base_url) = &config.base_url {
        let url = Url::parse(base_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid base-url '{}': {}", base_url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "base-url '{}' must use http or https",
                base_url
            )));
        }
    }

    if config.start_page < 1 {
        return Err(ConfigError::Validation(
            "start-page must be >= 1".to_string(),
        ));
    }

    if let Some(stop) = config.stop_page {
        if stop < config.start_page {
            return Err(ConfigError::Validation(format!(
                "stop-page ({}) must not be smaller than start-page ({})",
                stop, config.start_page
            )));
        }
    }

    if let Some(month) = &config.start_month {
        validate_month(month)?;
    }
    if let Some(month) = &config.stop_month {
        validate_month(month)?;
    }

    Ok(())
}

/// Validates fetcher configuration
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 || config.max_retries > 20 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be between 1 and 20, got {}",
            config.max_retries
        )));
    }

    if config.retry_delay > config.max_retry_delay {
        return Err(ConfigError::Validation(format!(
            "retry-delay ({}ms) must not exceed max-retry-delay ({}ms)",
            config.retry_delay, config.max_retry_delay
        )));
    }

    if config.timeout < 1000 {
        return Err(ConfigError::Validation(format!(
            "timeout must be >= 1000ms, got {}ms",
            config.timeout
        )));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user-agents cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

/// Validates pacing and concurrency
fn validate_pacing_config(
    config: &PacingConfig,
    fetcher: &FetcherConfig,
) -> Result<(), ConfigError> {
    if config.delay < 100 {
        return Err(ConfigError::Validation(format!(
            "delay must be >= 100ms, got {}ms",
            config.delay
        )));
    }

    if config.burst < 1 {
        return Err(ConfigError::Validation("burst must be >= 1".to_string()));
    }

    if config.workers < 1 || config.workers > MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and {}, got {}",
            MAX_WORKERS, config.workers
        )));
    }

    if config.page_timeout < fetcher.timeout {
        return Err(ConfigError::Validation(format!(
            "page-timeout ({}ms) must be at least the request timeout ({}ms)",
            config.page_timeout, fetcher.timeout
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "output directory cannot be empty".to_string(),
        ));
    }

    if matches!(&config.state_path, Some(path) if path.is_empty()) {
        return Err(ConfigError::Validation(
            "state-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates a `YYYYMM` month string
fn validate_month(month: &str) -> Result<(), ConfigError> {
    if month.len() != 6 || !month.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::Validation(format!(
            "month '{}' must have the form YYYYMM",
            month
        )));
    }

    NaiveDate::parse_from_str(&format!("{}01", month), "%Y%m%d").map_err(|_| {
        ConfigError::Validation(format!("month '{}' is not a valid calendar month", month))
    })?;

    Ok(())
}
