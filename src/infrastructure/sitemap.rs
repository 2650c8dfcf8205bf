//! Sitemap traversal engine
//!
//! Walks a sitemap or sitemap-index document tree and produces the
//! deduplicated set of content URLs for the crawl. Traversal is iterative
//! over a worklist; a per-run visited set bounds it even when sitemap
//! documents reference each other.
//!
//! Transport: a plain GET with an XML accept header is tried first, and the
//! fetch layer (with its unlocker fallback) takes over when the direct
//! request is blocked or reset. One child sitemap failing yields zero URLs
//! for that branch without aborting its siblings.

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::{CrawlTask, UrlCategory};
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::error::CrawlerError;
use crate::infrastructure::fetch::{should_fallback, PageFetcher};

/// Delay between successive sitemap document fetches.
const CHILD_FETCH_DELAY: Duration = Duration::from_millis(250);

/// Extensions excluded from the crawl set: static assets, not content.
const ASSET_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".ico", ".css", ".js", ".mjs", ".pdf",
    ".woff", ".woff2", ".ttf", ".eot", ".mp4", ".webm", ".zip",
];

/// Reference to a child sitemap inside a sitemap index.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapRef {
    pub loc: String,
    pub last_modified: Option<String>,
}

/// One page entry inside a urlset document.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlEntry {
    pub loc: String,
    pub change_frequency: Option<String>,
    pub priority: Option<f32>,
}

/// A parsed sitemap document. Transient: exists only during traversal.
#[derive(Debug, Clone, PartialEq)]
pub enum SitemapNode {
    Index(Vec<SitemapRef>),
    UrlSet(Vec<UrlEntry>),
}

/// Parse a sitemap XML document into its node kind.
///
/// Handles both `sitemapindex` and `urlset` roots; namespace prefixes are
/// ignored by matching on local names.
pub fn parse_sitemap(xml: &str) -> Result<SitemapNode, CrawlerError> {
    #[derive(PartialEq)]
    enum Root {
        Index,
        UrlSet,
    }

    let mut reader = Reader::from_str(xml);

    let mut root: Option<Root> = None;
    let mut refs: Vec<SitemapRef> = Vec::new();
    let mut entries: Vec<UrlEntry> = Vec::new();

    let mut in_entry = false;
    let mut field: Option<Vec<u8>> = None;
    let mut loc = String::new();
    let mut lastmod: Option<String> = None;
    let mut changefreq: Option<String> = None;
    let mut priority: Option<f32> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemapindex" => root = Some(Root::Index),
                b"urlset" => root = Some(Root::UrlSet),
                b"sitemap" | b"url" => {
                    in_entry = true;
                    loc.clear();
                    lastmod = None;
                    changefreq = None;
                    priority = None;
                }
                name @ (b"loc" | b"lastmod" | b"changefreq" | b"priority") if in_entry => {
                    field = Some(name.to_vec());
                }
                _ => {}
            },
            Ok(Event::Text(text)) => {
                if let Some(name) = &field {
                    let value = text
                        .unescape()
                        .map_err(|e| CrawlerError::Parse {
                            url: String::new(),
                            message: format!("invalid sitemap text node: {e}"),
                        })?
                        .trim()
                        .to_string();
                    match name.as_slice() {
                        b"loc" => loc = value,
                        b"lastmod" => lastmod = Some(value),
                        b"changefreq" => changefreq = Some(value),
                        b"priority" => priority = value.parse().ok(),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"sitemap" => {
                    in_entry = false;
                    if !loc.is_empty() {
                        refs.push(SitemapRef {
                            loc: std::mem::take(&mut loc),
                            last_modified: lastmod.take(),
                        });
                    }
                }
                b"url" => {
                    in_entry = false;
                    if !loc.is_empty() {
                        entries.push(UrlEntry {
                            loc: std::mem::take(&mut loc),
                            change_frequency: changefreq.take(),
                            priority: priority.take(),
                        });
                    }
                }
                b"loc" | b"lastmod" | b"changefreq" | b"priority" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(CrawlerError::Parse {
                    url: String::new(),
                    message: format!("malformed sitemap XML: {e}"),
                })
            }
        }
    }

    match root {
        Some(Root::Index) => Ok(SitemapNode::Index(refs)),
        Some(Root::UrlSet) => Ok(SitemapNode::UrlSet(entries)),
        None => Err(CrawlerError::Parse {
            url: String::new(),
            message: "document has neither a sitemapindex nor a urlset root".to_string(),
        }),
    }
}

/// Result of a full discovery pass.
#[derive(Debug, Clone)]
pub struct SitemapCollection {
    pub tasks: Vec<CrawlTask>,
    pub total: usize,
    pub sitemaps_processed: usize,
    /// Child sitemap branches that failed and yielded zero URLs.
    pub failures: usize,
    pub categories: BTreeMap<UrlCategory, usize>,
    pub duration_ms: u64,
}

#[derive(Default)]
struct TraversalState {
    queue: VecDeque<String>,
    visited: HashSet<String>,
    seen_urls: HashSet<String>,
    tasks: Vec<CrawlTask>,
    categories: BTreeMap<UrlCategory, usize>,
    sitemaps_processed: usize,
    failures: usize,
}

/// Discovers every content URL of the crawl target by walking its sitemaps.
pub struct SitemapCollector {
    http: Client,
    fetcher: Arc<PageFetcher>,
    allowed_origin: Url,
    child_delay: Duration,
}

impl SitemapCollector {
    pub fn new(config: &CrawlerConfig, fetcher: Arc<PageFetcher>) -> Result<Self, CrawlerError> {
        let allowed_origin = Url::parse(&config.base_url).map_err(|e| CrawlerError::Config {
            message: format!("invalid base_url {}: {e}", config.base_url),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/xml,text/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(|e| CrawlerError::Config {
                message: format!("invalid user agent: {e}"),
            })?,
        );

        let http = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| CrawlerError::Config {
                message: format!("failed to build sitemap client: {e}"),
            })?;

        Ok(Self {
            http,
            fetcher,
            allowed_origin,
            child_delay: CHILD_FETCH_DELAY,
        })
    }

    /// Walk the sitemap tree rooted at `root_sitemap_url`.
    ///
    /// A failure on the root document is fatal; failures on child branches
    /// are counted and skipped.
    pub async fn collect_all_urls(
        &self,
        root_sitemap_url: &str,
    ) -> Result<SitemapCollection, CrawlerError> {
        let started = Instant::now();
        info!(sitemap = root_sitemap_url, "starting sitemap discovery");

        let mut state = TraversalState::default();
        state.queue.push_back(root_sitemap_url.to_string());
        state.visited.insert(root_sitemap_url.to_string());

        let mut is_root = true;
        while let Some(sitemap_url) = state.queue.pop_front() {
            match self.load_document(&sitemap_url).await {
                Ok(node) => {
                    state.sitemaps_processed += 1;
                    self.apply_node(&mut state, &sitemap_url, node);
                }
                Err(error) if is_root => {
                    // No useful work can proceed without the root document.
                    return Err(error);
                }
                Err(error) => {
                    warn!(sitemap = %sitemap_url, %error, "skipping failed sitemap branch");
                    state.failures += 1;
                }
            }
            is_root = false;

            if !state.queue.is_empty() {
                tokio::time::sleep(self.child_delay).await;
            }
        }

        let collection = SitemapCollection {
            total: state.tasks.len(),
            tasks: state.tasks,
            sitemaps_processed: state.sitemaps_processed,
            failures: state.failures,
            categories: state.categories,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            urls = collection.total,
            sitemaps = collection.sitemaps_processed,
            failures = collection.failures,
            duration_ms = collection.duration_ms,
            "sitemap discovery finished"
        );
        Ok(collection)
    }

    /// Fetch and parse one sitemap document, falling back to the resilient
    /// fetch layer when direct access is blocked.
    async fn load_document(&self, sitemap_url: &str) -> Result<SitemapNode, CrawlerError> {
        let xml = match self.direct_get(sitemap_url).await {
            Ok(xml) => xml,
            Err(error) if should_fallback(&error) => {
                debug!(sitemap = sitemap_url, %error, "direct sitemap fetch blocked, using fetch layer");
                let result = self.fetcher.fetch(sitemap_url).await;
                match (result.success, result.body) {
                    (true, Some(body)) => body,
                    _ => {
                        return Err(CrawlerError::transport(
                            sitemap_url,
                            result
                                .error
                                .unwrap_or_else(|| "fallback fetch failed".to_string()),
                        ))
                    }
                }
            }
            Err(error) => return Err(error),
        };

        parse_sitemap(&xml).map_err(|e| match e {
            CrawlerError::Parse { message, .. } => CrawlerError::Parse {
                url: sitemap_url.to_string(),
                message,
            },
            other => other,
        })
    }

    async fn direct_get(&self, sitemap_url: &str) -> Result<String, CrawlerError> {
        let response = self
            .http
            .get(sitemap_url)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    CrawlerError::transport(sitemap_url, format!("connection failed: {e}"))
                } else {
                    CrawlerError::transport(sitemap_url, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlerError::HttpStatus {
                url: sitemap_url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| CrawlerError::transport(sitemap_url, e))
    }

    /// Merge one parsed document into the traversal state.
    fn apply_node(&self, state: &mut TraversalState, source: &str, node: SitemapNode) {
        match node {
            SitemapNode::Index(refs) => {
                debug!(sitemap = source, children = refs.len(), "sitemap index");
                for child in refs {
                    // Already-processed sitemaps are skipped, which bounds
                    // the traversal even across reference cycles.
                    if state.visited.insert(child.loc.clone()) {
                        state.queue.push_back(child.loc);
                    }
                }
            }
            SitemapNode::UrlSet(entries) => {
                let mut added = 0usize;
                for entry in entries {
                    if !self.is_crawlable(&entry.loc) {
                        continue;
                    }
                    if !state.seen_urls.insert(entry.loc.clone()) {
                        continue;
                    }
                    let category = Url::parse(&entry.loc)
                        .map(|u| UrlCategory::from_path(u.path()))
                        .unwrap_or(UrlCategory::Other);
                    *state.categories.entry(category).or_insert(0) += 1;
                    state.tasks.push(CrawlTask::new(entry.loc, source));
                    added += 1;
                }
                debug!(sitemap = source, added, "urlset processed");
            }
        }
    }

    /// Same origin, no fragment, not a static asset.
    fn is_crawlable(&self, candidate: &str) -> bool {
        let Ok(parsed) = Url::parse(candidate) else {
            return false;
        };
        if parsed.fragment().is_some() {
            return false;
        }
        if parsed.scheme() != self.allowed_origin.scheme()
            || parsed.host_str() != self.allowed_origin.host_str()
            || parsed.port_or_known_default() != self.allowed_origin.port_or_known_default()
        {
            return false;
        }
        let path = parsed.path().to_lowercase();
        !ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }
}
