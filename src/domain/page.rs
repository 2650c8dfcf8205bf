//! Page entities - the unit of crawling and persistence
//!
//! A `PageRecord` is what the persistence layer stores, keyed uniquely by
//! URL. Its `sha256` is computed over the normalized extracted text so that
//! layout-only changes on the site do not register as content changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::review::BrokerReview;

/// Detected kind of a page, derived from its URL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    BrokerReview,
    Blog,
    Guide,
    About,
    Contact,
    Page,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrokerReview => "broker_review",
            Self::Blog => "blog",
            Self::Guide => "guide",
            Self::About => "about",
            Self::Contact => "contact",
            Self::Page => "page",
        }
    }
}

/// Metadata extracted from a page's head and meta tags.
///
/// Every field defaults to an empty string when absent; extraction never
/// fails over a missing tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: String,
    pub description: String,
    pub keywords: String,
    pub author: String,
    pub published_time: String,
    pub modified_time: String,
    pub canonical_url: String,
    pub og_title: String,
    pub og_description: String,
    pub og_image: String,
    pub og_type: String,
    pub twitter_card: String,
    pub twitter_title: String,
    pub twitter_description: String,
    pub language: String,
    pub page_kind: Option<PageKind>,
}

/// Output of the content parser for a single page. Pure function of
/// (HTML, URL); carries no persistence bookkeeping yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPage {
    pub url: String,
    pub title: String,
    pub text_content: String,
    /// SHA-256 hex digest of `text_content`.
    pub sha256: String,
    pub metadata: PageMetadata,
    /// Present only for `broker_review` pages that extracted successfully.
    pub review: Option<BrokerReview>,
}

/// The unit of persistence. `url` is globally unique in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub status: u16,
    pub fetched_at: DateTime<Utc>,
    pub sha256: String,
    pub html: String,
    pub text_content: String,
    pub metadata: PageMetadata,
    pub review: Option<BrokerReview>,
}

impl PageRecord {
    /// Assemble a record from a fetch outcome and its parsed content.
    pub fn from_parsed(parsed: ParsedPage, status: u16, html: String) -> Self {
        Self {
            url: parsed.url,
            status,
            fetched_at: Utc::now(),
            sha256: parsed.sha256,
            html,
            text_content: parsed.text_content,
            metadata: parsed.metadata,
            review: parsed.review,
        }
    }
}

/// Result of validating a parsed page. Issues are reported, never thrown,
/// so a malformed page does not block ingestion.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Flag structural problems in a parsed page: missing url/title/text/hash,
/// or a review rating outside [0, 10].
pub fn validate_parsed_data(parsed: &ParsedPage) -> ValidationReport {
    let mut report = ValidationReport::default();

    if parsed.url.is_empty() {
        report.issues.push("missing url".to_string());
    }
    if parsed.title.is_empty() {
        report.issues.push("missing title".to_string());
    }
    if parsed.text_content.is_empty() {
        report.issues.push("missing text content".to_string());
    }
    if parsed.sha256.is_empty() {
        report.issues.push("missing content hash".to_string());
    }
    if let Some(review) = &parsed.review {
        if let Some(rating) = review.rating {
            if !(0.0..=10.0).contains(&rating) {
                report
                    .issues
                    .push(format!("rating {rating} outside valid range [0, 10]"));
            }
        }
    }

    report
}
