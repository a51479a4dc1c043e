//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client
//! - Rotating user-agent and language headers per attempt
//! - Retry with fixed or exponential backoff
//! - Pacing every attempt through the shared rate limiter
//! - Error classification

use crate::config::{Backoff, FetcherConfig};
use crate::crawler::scheduler::{RateLimiter, StallTimer};
use crate::FetchError;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Desktop browser user agents used when the config pool is empty
const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "zh-CN,zh;q=0.9,en;q=0.8",
    "zh-CN,zh;q=0.9",
    "zh-CN,zh-TW;q=0.9,zh;q=0.8,en-US;q=0.7,en;q=0.6",
    "en-US,en;q=0.9,zh-CN;q=0.8",
];

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Sent as the `Referer` header
    pub referer: Option<String>,

    /// Replaces the client timeout for this call
    pub timeout: Option<Duration>,

    /// Paused while the call waits for the limiter or backs off
    pub stall_timer: Option<Arc<StallTimer>>,
}

impl FetchOptions {
    pub fn with_referer(referer: impl Into<String>) -> Self {
        Self {
            referer: Some(referer.into()),
            ..Self::default()
        }
    }

    pub fn with_stall_timer(mut self, timer: Arc<StallTimer>) -> Self {
        self.stall_timer = Some(timer);
        self
    }
}

/// Builds the HTTP client shared by all fetches
///
/// # Arguments
///
/// * `config` - The fetcher configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &FetcherConfig) -> Result<Client, reqwest::Error> {
    let timeout = Duration::from_millis(config.timeout);

    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches pages as text with retries and header rotation
///
/// The fetcher holds no mutable state; clones of the `Arc` it usually lives
/// in are shared by the walker and all workers.
pub struct Fetcher {
    client: Client,
    user_agents: Vec<String>,
    max_attempts: u32,
    retry_delay: Duration,
    max_retry_delay: Duration,
    backoff: Backoff,
    limiter: Option<Arc<RateLimiter>>,
}

impl Fetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self, reqwest::Error> {
        let user_agents = if config.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
        } else {
            config.user_agents.clone()
        };

        Ok(Self {
            client: build_http_client(config)?,
            user_agents,
            max_attempts: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay),
            max_retry_delay: Duration::from_millis(config.max_retry_delay),
            backoff: config.backoff,
            limiter: None,
        })
    }

    /// Paces every attempt through `limiter`
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_with(url, &FetchOptions::default()).await
    }

    /// Fetches `url`, retrying until it succeeds or the attempts run out
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx | Return body |
    /// | Any other status | Retry |
    /// | Timeout | Retry |
    /// | Connection or body error | Retry |
    ///
    /// After the last attempt the error is wrapped in `FetchError::Exhausted`.
    pub async fn fetch_with(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<String, FetchError> {
        let mut attempt = 1;

        loop {
            if let Some(limiter) = &self.limiter {
                let _paused = options.stall_timer.as_deref().map(StallTimer::pause);
                limiter.acquire().await;
            }

            let error = match self.attempt(url, options).await {
                Ok(body) => {
                    if attempt > 1 {
                        tracing::debug!(url, attempt, "Fetch succeeded after retry");
                    }
                    return Ok(body);
                }
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                tracing::warn!(url, attempts = attempt, error = %error, "Giving up on URL");
                return Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.backoff_delay(attempt);
            tracing::debug!(
                url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Fetch failed, retrying"
            );
            {
                let _paused = options.stall_timer.as_deref().map(StallTimer::pause);
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, self.pick_user_agent())
            .header(ACCEPT, ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, pick(ACCEPT_LANGUAGES));

        if let Some(referer) = &options.referer {
            request = request.header(REFERER, referer.as_str());
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| classify(url, e))
    }

    /// Delay after the `failed_attempt`-th attempt
    fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.retry_delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
                self.retry_delay
                    .saturating_mul(factor)
                    .min(self.max_retry_delay)
            }
        }
    }

    fn pick_user_agent(&self) -> &str {
        &self.user_agents[fastrand::usize(..self.user_agents.len())]
    }
}

fn pick<'a>(pool: &[&'a str]) -> &'a str {
    pool[fastrand::usize(..pool.len())]
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        FetchError::Network {
            url: url.to_string(),
            message: "Connection refused".to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
