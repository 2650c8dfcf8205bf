//! Crawler configuration
//!
//! Settings resolve in three tiers, highest priority first:
//! 1. Explicit CLI overrides
//! 2. Environment variables (`CRAWL_*`, `DATABASE_URL`, `UNLOCKER_*`)
//! 3. Built-in defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://brokerchooser.com";
pub const DEFAULT_SITEMAP_PATH: &str = "/sitemap.xml";
pub const DEFAULT_USER_AGENT: &str =
    "review-crawler/0.3 (+https://brokerchooser.com; content indexing)";

/// Credentials for the web-unlocking proxy used as the fallback transport
/// when direct access is blocked by bot detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockerConfig {
    pub endpoint: String,
    pub token: String,
    pub zone: String,
}

/// Complete configuration for one crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Origin the crawl is restricted to.
    pub base_url: String,
    /// Root sitemap (or sitemap index) to start discovery from.
    pub sitemap_url: String,
    /// SQLite database URL.
    pub database_url: String,
    /// Number of concurrent crawl workers.
    pub concurrency: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum fetch attempts per URL.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Delay each worker applies between its own successive URLs.
    pub request_delay_ms: u64,
    /// Bypass existence checks and always fully upsert.
    pub force: bool,
    /// Skip the write entirely when content is unchanged.
    pub skip_if_exists: bool,
    /// Filter out URLs already present in the store before crawling.
    pub resumable: bool,
    /// Optional cap on the number of URLs crawled in this run.
    pub max_urls: Option<usize>,
    /// Verbose logging.
    pub debug: bool,
    pub user_agent: String,
    /// Fallback proxy credentials; fallback is disabled when absent.
    pub unlocker: Option<UnlockerConfig>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            sitemap_url: format!("{DEFAULT_BASE_URL}{DEFAULT_SITEMAP_PATH}"),
            database_url: "sqlite://data/pages.db".to_string(),
            concurrency: 6,
            request_timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            request_delay_ms: 1000,
            force: false,
            skip_if_exists: true,
            resumable: true,
            max_urls: None,
            debug: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            unlocker: None,
        }
    }
}

impl CrawlerConfig {
    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = env::var("CRAWL_BASE_URL") {
            config.base_url = v.trim_end_matches('/').to_string();
            config.sitemap_url = format!("{}{DEFAULT_SITEMAP_PATH}", config.base_url);
        }
        if let Ok(v) = env::var("CRAWL_SITEMAP_URL") {
            config.sitemap_url = v;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            config.database_url = v;
        }
        if let Ok(v) = env::var("CRAWL_CONCURRENCY") {
            config.concurrency = v.parse().context("CRAWL_CONCURRENCY must be an integer")?;
        }
        if let Ok(v) = env::var("CRAWL_TIMEOUT_SECS") {
            config.request_timeout_secs =
                v.parse().context("CRAWL_TIMEOUT_SECS must be an integer")?;
        }
        if let Ok(v) = env::var("CRAWL_MAX_RETRIES") {
            config.max_retries = v.parse().context("CRAWL_MAX_RETRIES must be an integer")?;
        }
        if let Ok(v) = env::var("CRAWL_DELAY_MS") {
            config.request_delay_ms = v.parse().context("CRAWL_DELAY_MS must be an integer")?;
        }
        if let Ok(v) = env::var("CRAWL_MAX_URLS") {
            config.max_urls = Some(v.parse().context("CRAWL_MAX_URLS must be an integer")?);
        }
        if let Ok(v) = env::var("CRAWL_USER_AGENT") {
            config.user_agent = v;
        }

        // Unlocker proxy needs all three pieces to be usable.
        if let (Ok(endpoint), Ok(token)) = (env::var("UNLOCKER_ENDPOINT"), env::var("UNLOCKER_TOKEN"))
        {
            let zone = env::var("UNLOCKER_ZONE").unwrap_or_else(|_| "web_unlocker".to_string());
            config.unlocker = Some(UnlockerConfig {
                endpoint,
                token,
                zone,
            });
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        url::Url::parse(&self.base_url).context("base_url is not a valid URL")?;
        url::Url::parse(&self.sitemap_url).context("sitemap_url is not a valid URL")?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}
