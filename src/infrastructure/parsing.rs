//! Content parsing: HTML in, structured page data out
//!
//! No I/O in this module tree; parsers are pure functions of (HTML, URL)
//! and safe to share across workers.

pub mod page_parser;
pub mod review_parser;
pub mod sections;

pub use page_parser::{classify_page_kind, PageParser};
pub use review_parser::{parse_broker_review, review_slug, REVIEW_PATH_PREFIX};
pub use sections::{extract_sections, map_heading, SECTION_TABLE};

/// Collapse all whitespace runs to single spaces and trim.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
