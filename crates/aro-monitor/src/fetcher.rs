use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};

use crate::config::FetchConfig;

/// Desktop Chrome user agent sent with every request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Why a single attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("server responded with {0}")]
    Status(StatusCode),
    #[error("request failed: {0}")]
    Other(String),
}

impl FetchFailure {
    /// Timeouts, connection trouble and 5xx are worth another attempt. 4xx never is.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchFailure::Timeout | FetchFailure::Connect(_) => true,
            FetchFailure::Status(status) => status.is_server_error(),
            FetchFailure::Other(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchFailure::Timeout
        } else if let Some(status) = e.status() {
            FetchFailure::Status(status)
        } else if e.is_connect() || e.is_body() {
            FetchFailure::Connect(e.to_string())
        } else {
            FetchFailure::Other(e.to_string())
        }
    }
}

/// The page could not be retrieved; carries the cause of the final attempt.
#[derive(Debug, thiserror::Error)]
#[error("Giving up on {url} after {attempts} attempt(s): {last}")]
pub struct NetworkError {
    pub url: String,
    pub attempts: u32,
    #[source]
    pub last: FetchFailure,
}

/// Exponential backoff between attempts.
///
/// The delay before retry `n` (1-based) is `base_delay * 2^(n-1)`, capped at
/// `max_delay`, plus a random amount up to `jitter`. `max_attempts` counts the
/// first try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no waiting. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff(retry) + self.jitter_sample()
    }

    fn jitter_sample(&self) -> Duration {
        let span = self.jitter.as_millis() as u64;
        if span == 0 {
            return Duration::ZERO;
        }
        let seed = u64::from(Utc::now().timestamp_subsec_nanos());
        Duration::from_millis(seed % (span + 1))
    }
}

/// Something that can hand back the body of a URL in one attempt.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<String, FetchFailure>;
}

#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(BROWSER_USER_AGENT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn get(&self, url: &str, timeout: Duration) -> Result<String, FetchFailure> {
        Ok(self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .inspect_err(|e| log::debug!("HTTP error: {e:?}"))?
            .error_for_status()?
            .text()
            .await
            .inspect_err(|e| log::debug!("Decode error: {e:?}"))?)
    }
}

pub struct Fetcher {
    source: Box<dyn PageSource>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_source(
            Box::new(HttpSource::new()?),
            config.timeout,
            config.retry,
        ))
    }

    pub fn with_source(source: Box<dyn PageSource>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            source,
            timeout,
            retry,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<String, NetworkError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            log::info!("Fetching {} (attempt {}/{})", url, attempt, max_attempts);

            let failure = match self.source.get(url, self.timeout).await {
                Ok(html) => return Ok(html),
                Err(failure) => failure,
            };

            if !failure.is_transient() || attempt >= max_attempts {
                log::error!("Fetch of {} failed on attempt {}: {}", url, attempt, failure);
                return Err(NetworkError {
                    url: url.to_string(),
                    attempts: attempt,
                    last: failure,
                });
            }

            let delay = self.retry.delay_for(attempt);
            log::warn!(
                "Attempt {} for {} failed: {}; retrying in {:?}",
                attempt,
                url,
                failure,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
