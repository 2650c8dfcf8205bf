//! Domain module - core entities and value objects
//!
//! Everything in here is pure data: no I/O, no async, no store access.
//! The infrastructure layer produces and consumes these types.

pub mod page;
pub mod review;
pub mod stats;
pub mod task;

pub use page::{
    validate_parsed_data, PageKind, PageMetadata, PageRecord, ParsedPage, ValidationReport,
};
pub use review::BrokerReview;
pub use stats::{CrawlErrorRecord, CrawlReport, CrawlStats, RunOutcome, UpsertCounters};
pub use task::{CrawlTask, UrlCategory};
