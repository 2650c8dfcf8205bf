//! Resilient fetch layer
//!
//! One `PageFetcher::fetch` call performs up to `max_retries` attempts with
//! exponential backoff and jitter. Transport is abstracted behind
//! `FetchStrategy`: a direct GET is tried first, and a bot-detection
//! response (403/429/connection reset) switches the remaining attempts to
//! the web-unlocking proxy when one is configured.
//!
//! The fetcher never propagates an error to its caller: every invocation
//! yields a `FetchResult`, failed or not, so the orchestrator's per-URL
//! boundary stays exception-free.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::infrastructure::config::{CrawlerConfig, UnlockerConfig};
use crate::infrastructure::error::CrawlerError;
use crate::infrastructure::hashing::sha256_hex;

const ACCEPT_HEADER: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Transport that produced a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Direct,
    Unlocker,
}

/// Outcome of one `fetch` call. Immutable once produced.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub success: bool,
    pub status: Option<u16>,
    pub body: Option<String>,
    pub content_length: usize,
    /// SHA-256 of the raw body, on success.
    pub sha256: Option<String>,
    pub elapsed_ms: u64,
    /// Attempt number that succeeded, or total attempts made on failure.
    pub attempts: u32,
    pub method: FetchMethod,
    pub error: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    fn failure(url: &str, attempts: u32, method: FetchMethod, elapsed: Duration, error: &CrawlerError) -> Self {
        let status = match error {
            CrawlerError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        };
        Self {
            url: url.to_string(),
            success: false,
            status,
            body: None,
            content_length: 0,
            sha256: None,
            elapsed_ms: elapsed.as_millis() as u64,
            attempts,
            method,
            error: Some(error.to_string()),
            fetched_at: Utc::now(),
        }
    }
}

/// Raw response from one strategy attempt.
#[derive(Debug)]
pub struct StrategyResponse {
    pub status: u16,
    pub body: String,
}

/// A single way of retrieving a URL. Implementations must be stateless
/// across invocations so workers can share them freely.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<StrategyResponse, CrawlerError>;
    fn method(&self) -> FetchMethod;
}

/// Plain HTTP GET with crawl-friendly headers.
pub struct DirectFetch {
    client: Client,
}

impl DirectFetch {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, CrawlerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(ACCEPT_HEADER),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).map_err(|e| CrawlerError::Config {
                message: format!("invalid user agent: {e}"),
            })?,
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| CrawlerError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FetchStrategy for DirectFetch {
    async fn fetch(&self, url: &str) -> Result<StrategyResponse, CrawlerError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(CrawlerError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        Ok(StrategyResponse { status, body })
    }

    fn method(&self) -> FetchMethod {
        FetchMethod::Direct
    }
}

#[derive(Serialize)]
struct UnlockerRequest<'a> {
    zone: &'a str,
    url: &'a str,
    format: &'a str,
}

/// Managed web-unlocking proxy: POST `{zone, url, format: "raw"}` with a
/// bearer token; the response body is the unlocked page.
pub struct UnlockerFetch {
    client: Client,
    config: UnlockerConfig,
}

impl UnlockerFetch {
    pub fn new(config: UnlockerConfig, timeout: Duration) -> Result<Self, CrawlerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlerError::Config {
                message: format!("failed to build unlocker client: {e}"),
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl FetchStrategy for UnlockerFetch {
    async fn fetch(&self, url: &str) -> Result<StrategyResponse, CrawlerError> {
        let request = UnlockerRequest {
            zone: &self.config.zone,
            url,
            format: "raw",
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(CrawlerError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        // The proxy returns 200 for the proxied page itself on success.
        Ok(StrategyResponse { status, body })
    }

    fn method(&self) -> FetchMethod {
        FetchMethod::Unlocker
    }
}

/// Map a reqwest error into the crawl taxonomy, preserving enough of the
/// cause for the retry and fallback policies to classify it.
fn classify_reqwest_error(url: &str, error: &reqwest::Error) -> CrawlerError {
    let message = if error.is_timeout() {
        format!("timeout: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    };
    CrawlerError::transport(url, message)
}

/// Whether an error from the direct strategy should switch subsequent
/// attempts to the fallback transport.
pub(crate) fn should_fallback(error: &CrawlerError) -> bool {
    match error {
        CrawlerError::HttpStatus { status, .. } => *status == 403 || *status == 429,
        CrawlerError::Transport { message, .. } => {
            let message = message.to_lowercase();
            message.contains("connection failed")
                || message.contains("connection reset")
                || message.contains("reset by peer")
        }
        _ => false,
    }
}

/// Exponential backoff with jitter, capped at `MAX_BACKOFF`.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponential = base.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
    let jitter = fastrand::u64(0..=base.as_millis() as u64 / 2 + 1);
    Duration::from_millis(exponential + jitter).min(MAX_BACKOFF)
}

/// The fetch layer entry point shared by all crawl workers.
pub struct PageFetcher {
    allowed_origin: Url,
    max_retries: u32,
    retry_base_delay: Duration,
    direct: DirectFetch,
    unlocker: Option<UnlockerFetch>,
}

impl PageFetcher {
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, CrawlerError> {
        let allowed_origin = Url::parse(&config.base_url).map_err(|e| CrawlerError::Config {
            message: format!("invalid base_url {}: {e}", config.base_url),
        })?;
        let timeout = config.request_timeout();

        let unlocker = config
            .unlocker
            .clone()
            .map(|u| UnlockerFetch::new(u, timeout))
            .transpose()?;

        Ok(Self {
            allowed_origin,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            direct: DirectFetch::new(&config.user_agent, timeout)?,
            unlocker,
        })
    }

    /// Same scheme, host and port as the crawl target.
    pub fn is_allowed_origin(&self, url: &Url) -> bool {
        url.scheme() == self.allowed_origin.scheme()
            && url.host_str() == self.allowed_origin.host_str()
            && url.port_or_known_default() == self.allowed_origin.port_or_known_default()
    }

    /// Fetch one URL with retry, backoff and transport fallback.
    ///
    /// Always returns a `FetchResult`; inspect `success` and `error`.
    pub async fn fetch(&self, url: &str) -> FetchResult {
        let started = Instant::now();

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                let error = CrawlerError::transport(url, format!("invalid URL: {e}"));
                return FetchResult::failure(url, 0, FetchMethod::Direct, started.elapsed(), &error);
            }
        };

        // Domain restriction is enforced before any network traffic.
        if !self.is_allowed_origin(&parsed) {
            let error = CrawlerError::DomainViolation {
                url: url.to_string(),
                expected_origin: self.allowed_origin.origin().ascii_serialization(),
            };
            return FetchResult::failure(url, 0, FetchMethod::Direct, started.elapsed(), &error);
        }

        let mut use_fallback = false;
        let mut last_error = CrawlerError::transport(url, "no fetch attempt made");

        for attempt in 1..=self.max_retries {
            let strategy: &dyn FetchStrategy = match (&self.unlocker, use_fallback) {
                (Some(unlocker), true) => unlocker,
                _ => &self.direct,
            };
            let method = strategy.method();

            match strategy.fetch(url).await {
                Ok(response) => {
                    let elapsed = started.elapsed();
                    debug!(
                        url,
                        status = response.status,
                        attempt,
                        method = ?method,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "fetch succeeded"
                    );
                    return FetchResult {
                        url: url.to_string(),
                        success: true,
                        status: Some(response.status),
                        content_length: response.body.len(),
                        sha256: Some(sha256_hex(&response.body)),
                        body: Some(response.body),
                        elapsed_ms: elapsed.as_millis() as u64,
                        attempts: attempt,
                        method,
                        error: None,
                        fetched_at: Utc::now(),
                    };
                }
                Err(error) => {
                    warn!(url, attempt, method = ?method, %error, "fetch attempt failed");

                    // Bot-detection responses redirect the remaining
                    // attempts through the unlocker, even when the status
                    // itself is not in the retryable set (403).
                    let switched = !use_fallback
                        && method == FetchMethod::Direct
                        && self.unlocker.is_some()
                        && should_fallback(&error);
                    if switched {
                        use_fallback = true;
                        debug!(url, "switching to unlocker transport");
                    }

                    let retryable = error.is_retryable() || switched;
                    last_error = error;

                    if !retryable || attempt == self.max_retries {
                        if !retryable {
                            return FetchResult::failure(
                                url,
                                attempt,
                                method,
                                started.elapsed(),
                                &last_error,
                            );
                        }
                        break;
                    }

                    tokio::time::sleep(backoff_delay(self.retry_base_delay, attempt)).await;
                }
            }
        }

        let method = if use_fallback {
            FetchMethod::Unlocker
        } else {
            FetchMethod::Direct
        };
        FetchResult::failure(url, self.max_retries, method, started.elapsed(), &last_error)
    }
}
