//! Infrastructure layer: HTTP, XML, HTML, SQLite and the ambient stack
//!
//! Everything that talks to the outside world lives here. The domain layer
//! stays free of I/O; the application layer composes these pieces.

pub mod config;
pub mod database_connection;
pub mod error;
pub mod fetch;
pub mod hashing;
pub mod logging;
pub mod page_repository;
pub mod parsing;
pub mod sitemap;

pub use config::{CrawlerConfig, UnlockerConfig};
pub use database_connection::DatabaseConnection;
pub use error::CrawlerError;
pub use fetch::{FetchMethod, FetchResult, FetchStrategy, PageFetcher};
pub use hashing::sha256_hex;
pub use logging::init_logging;
pub use page_repository::{PageRepository, UpsertOptions, UpsertOutcome};
pub use parsing::PageParser;
pub use sitemap::{SitemapCollection, SitemapCollector};
