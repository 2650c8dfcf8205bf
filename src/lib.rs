//! Resumable crawl-and-extract pipeline for brokerchooser.com
//!
//! The crate is layered:
//! - `domain`: plain data types and invariants, no I/O
//! - `infrastructure`: HTTP fetching, sitemap traversal, HTML parsing,
//!   SQLite persistence and the ambient stack
//! - `application`: the orchestrator that composes a full run

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{CrawlOrchestrator, RunState};
pub use domain::{BrokerReview, CrawlReport, CrawlStats, PageRecord, ParsedPage, RunOutcome};
pub use infrastructure::{
    CrawlerConfig, CrawlerError, DatabaseConnection, PageFetcher, PageParser, PageRepository,
    SitemapCollector,
};
