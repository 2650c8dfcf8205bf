//! Broker review extraction
//!
//! Heuristic extraction of the structured review payload from a review
//! page: rating, pros/cons, named content sections and the last-updated
//! date. Everything degrades to `None`/empty rather than failing; the only
//! hard error is `InvalidPageKind` for URLs outside the review path.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::domain::{BrokerReview, PageMetadata};
use crate::infrastructure::error::CrawlerError;
use crate::infrastructure::parsing::normalize_whitespace;
use crate::infrastructure::parsing::sections::extract_sections;

/// Path prefix identifying review pages.
pub const REVIEW_PATH_PREFIX: &str = "/broker-reviews/";

/// Rating selectors, highest priority first.
const RATING_SELECTORS: &[&str] = &[
    ".rating-value",
    ".overall-rating",
    ".review-score",
    ".broker-rating",
    "[data-rating]",
];

/// Date-bearing selectors, highest priority first.
const DATE_SELECTORS: &[&str] = &[
    ".last-updated",
    ".review-updated",
    "time[datetime]",
    "[data-last-updated]",
    ".article-date",
];

const PROS_CONTAINER_SELECTOR: &str =
    ".pros li, .advantages li, .positives li, .pros-list li";
const CONS_CONTAINER_SELECTOR: &str =
    ".cons li, .disadvantages li, .negatives li, .cons-list li";

const PROS_KEYWORDS: &[&str] = &["pros", "advantages", "what we like"];
const CONS_KEYWORDS: &[&str] = &["cons", "disadvantages", "drawbacks", "what we don't like"];

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static HEADING_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, h4").unwrap());
static LIST_ITEM_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("li").unwrap());

/// Extract the review slug from a URL, if it is a review page: a non-empty
/// slug segment directly under the review path prefix.
pub fn review_slug(url: &Url) -> Option<String> {
    let path = url.path();
    let rest = path.strip_prefix(REVIEW_PATH_PREFIX)?;
    let slug = rest.split('/').next().unwrap_or("");
    if slug.is_empty() {
        None
    } else {
        Some(slug.to_string())
    }
}

/// "interactive-brokers" -> "Interactive Brokers".
fn broker_name_from_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse the structured review payload from a review page.
///
/// Fails with `InvalidPageKind` when the URL does not match the review path
/// pattern; the general page parser catches that and omits the payload.
pub fn parse_broker_review(
    document: &Html,
    url: &Url,
    metadata: &PageMetadata,
) -> Result<BrokerReview, CrawlerError> {
    let slug = review_slug(url).ok_or_else(|| CrawlerError::InvalidPageKind {
        url: url.to_string(),
    })?;

    let mut review = BrokerReview::new(broker_name_from_slug(&slug), slug);
    review.rating = extract_rating(document);

    let (pros, cons) = extract_pros_cons(document);
    review.pros = pros;
    review.cons = cons;

    let (sections, unmapped) = extract_sections(document);
    review.sections = sections;
    review.unmapped_sections = unmapped;

    review.last_updated = extract_last_updated(document, metadata);

    debug!(
        broker = %review.broker_name,
        rating = ?review.rating,
        pros = review.pros.len(),
        cons = review.cons.len(),
        sections = review.sections.len(),
        unmapped = review.unmapped_sections.len(),
        "review extracted"
    );
    Ok(review)
}

/// First numeric value in [0, 10] found across the prioritized selector
/// list, checking `data-rating` attributes before element text.
fn extract_rating(document: &Html) -> Option<f64> {
    for selector in RATING_SELECTORS {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            let candidates = element
                .value()
                .attr("data-rating")
                .map(str::to_string)
                .into_iter()
                .chain(std::iter::once(element.text().collect::<String>()));
            for text in candidates {
                if let Some(rating) = first_number_in_range(&text) {
                    return Some(rating);
                }
            }
        }
    }
    None
}

fn first_number_in_range(text: &str) -> Option<f64> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .find(|value| (0.0..=10.0).contains(value))
}

/// Pros/cons via two independent strategies, merged with exact-text
/// duplicate suppression. Near-duplicates (casing, punctuation) are
/// intentionally not collapsed.
fn extract_pros_cons(document: &Html) -> (Vec<String>, Vec<String>) {
    let mut pros = items_from_containers(document, PROS_CONTAINER_SELECTOR);
    let mut cons = items_from_containers(document, CONS_CONTAINER_SELECTOR);

    for heading in document.select(&HEADING_SELECTOR) {
        let text = normalize_whitespace(&heading.text().collect::<String>()).to_lowercase();
        let matches_pros = PROS_KEYWORDS.iter().any(|k| text.contains(k));
        let matches_cons = CONS_KEYWORDS.iter().any(|k| text.contains(k));

        // A combined "pros and cons" heading is ambiguous; the dedicated
        // container strategy covers those blocks.
        let target = match (matches_pros, matches_cons) {
            (true, false) => &mut pros,
            (false, true) => &mut cons,
            _ => continue,
        };
        merge_unique(target, list_items_after_heading(heading));
    }

    (pros, cons)
}

fn items_from_containers(document: &Html, selector: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };
    let mut items = Vec::new();
    for element in document.select(&selector) {
        let text = normalize_whitespace(&element.text().collect::<String>());
        if !text.is_empty() && !items.contains(&text) {
            items.push(text);
        }
    }
    items
}

/// Items of the first list element following a heading, stopping at the
/// next heading.
fn list_items_after_heading(heading: ElementRef) -> Vec<String> {
    for sibling in heading.next_siblings() {
        let Some(element) = ElementRef::wrap(sibling) else {
            continue;
        };
        match element.value().name() {
            "h1" | "h2" | "h3" | "h4" => break,
            "ul" | "ol" => {
                return element
                    .select(&LIST_ITEM_SELECTOR)
                    .map(|li| normalize_whitespace(&li.text().collect::<String>()))
                    .filter(|text| !text.is_empty())
                    .collect();
            }
            _ => {}
        }
    }
    Vec::new()
}

fn merge_unique(target: &mut Vec<String>, additions: Vec<String>) {
    for item in additions {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

/// First parseable date in the prioritized selector list, falling back to
/// the document's modified/published metadata.
fn extract_last_updated(document: &Html, metadata: &PageMetadata) -> Option<NaiveDate> {
    for selector in DATE_SELECTORS {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            let candidates = ["datetime", "data-last-updated"]
                .iter()
                .filter_map(|attr| element.value().attr(attr))
                .map(str::to_string)
                .chain(std::iter::once(element.text().collect::<String>()));
            for text in candidates {
                if let Some(date) = parse_flexible_date(&text) {
                    return Some(date);
                }
            }
        }
    }

    [&metadata.modified_time, &metadata.published_time]
        .into_iter()
        .find_map(|value| parse_flexible_date(value))
}

/// Accepts RFC 3339 timestamps and the date formats the site uses in
/// visible "last updated" labels.
fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let raw = normalize_whitespace(raw);
    // Visible labels carry a prefix, e.g. "Last updated: May 3, 2024".
    let candidate = raw.rsplit(':').next().unwrap_or(&raw).trim();
    let candidates = [raw.as_str(), candidate];

    for text in candidates {
        if text.is_empty() {
            continue;
        }
        if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
            return Some(datetime.date_naive());
        }
        for format in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"] {
            if let Ok(date) = NaiveDate::parse_from_str(text, format) {
                return Some(date);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review_url() -> Url {
        Url::parse("https://brokerchooser.com/broker-reviews/interactive-brokers/").unwrap()
    }

    #[test]
    fn slug_requires_a_non_empty_segment_under_the_review_prefix() {
        assert_eq!(
            review_slug(&review_url()).as_deref(),
            Some("interactive-brokers")
        );
        let not_review = Url::parse("https://brokerchooser.com/blog/intro/").unwrap();
        assert!(review_slug(&not_review).is_none());
        let bare_prefix = Url::parse("https://brokerchooser.com/broker-reviews/").unwrap();
        assert!(review_slug(&bare_prefix).is_none());
    }

    #[test]
    fn broker_name_is_title_cased_from_the_slug() {
        assert_eq!(broker_name_from_slug("interactive-brokers"), "Interactive Brokers");
        assert_eq!(broker_name_from_slug("etoro"), "Etoro");
    }

    #[test]
    fn non_review_url_is_an_invalid_page_kind() {
        let html = Html::parse_document("<html><body></body></html>");
        let url = Url::parse("https://brokerchooser.com/blog/intro/").unwrap();
        let result = parse_broker_review(&html, &url, &PageMetadata::default());
        assert!(matches!(result, Err(CrawlerError::InvalidPageKind { .. })));
    }

    #[test]
    fn rating_takes_the_first_in_range_number() {
        let html = Html::parse_document(r#"<div class="rating-value">8.5</div>"#);
        assert_eq!(extract_rating(&html), Some(8.5));
    }

    #[test]
    fn non_numeric_rating_markup_yields_none() {
        let html = Html::parse_document(r#"<div class="rating-value">rating: n/a</div>"#);
        assert_eq!(extract_rating(&html), None);
    }

    #[test]
    fn out_of_range_numbers_are_skipped() {
        let html = Html::parse_document(r#"<div class="rating-value">Top 100 broker, 4.6 stars</div>"#);
        assert_eq!(extract_rating(&html), Some(4.6));
    }

    #[test]
    fn data_rating_attribute_wins_over_text() {
        let html = Html::parse_document(r#"<div data-rating="9.1">stars</div>"#);
        assert_eq!(extract_rating(&html), Some(9.1));
    }

    #[test]
    fn pros_and_cons_merge_both_strategies_without_exact_duplicates() {
        let html = Html::parse_document(
            r#"<body>
                <div class="pros"><ul>
                    <li>Low fees</li>
                    <li>Great platform</li>
                </ul></div>
                <h3>Advantages</h3>
                <ul>
                    <li>Low fees</li>
                    <li>Fast account opening</li>
                </ul>
                <h3>Drawbacks</h3>
                <ul>
                    <li>High inactivity fee</li>
                </ul>
            </body>"#,
        );

        let (pros, cons) = extract_pros_cons(&html);
        assert_eq!(pros, vec!["Low fees", "Great platform", "Fast account opening"]);
        assert_eq!(cons, vec!["High inactivity fee"]);
    }

    #[test]
    fn combined_pros_and_cons_heading_is_not_misattributed() {
        let html = Html::parse_document(
            r#"<body>
                <h2>Pros and cons</h2>
                <ul><li>Ambiguous entry</li></ul>
            </body>"#,
        );
        let (pros, cons) = extract_pros_cons(&html);
        assert!(pros.is_empty());
        assert!(cons.is_empty());
    }

    #[test]
    fn last_updated_prefers_visible_date_selectors() {
        let html = Html::parse_document(
            r#"<body><span class="last-updated">Last updated: May 3, 2024</span></body>"#,
        );
        let date = extract_last_updated(&html, &PageMetadata::default());
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 5, 3));
    }

    #[test]
    fn last_updated_falls_back_to_document_metadata() {
        let html = Html::parse_document("<body></body>");
        let metadata = PageMetadata {
            modified_time: "2024-02-11T09:30:00+00:00".to_string(),
            ..Default::default()
        };
        let date = extract_last_updated(&html, &metadata);
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 2, 11));
    }

    #[test]
    fn full_review_extraction_produces_a_payload() {
        let html = Html::parse_document(
            r#"<html><body>
                <h1>Interactive Brokers Review</h1>
                <div class="rating-value">9.3</div>
                <div class="pros"><ul><li>Wide product range</li></ul></div>
                <div class="cons"><ul><li>Complex platform</li></ul></div>
                <h2>Fees</h2>
                <p>Very low trading fees.</p>
                <h2>Support Quality</h2>
                <p>Mixed experiences.</p>
            </body></html>"#,
        );

        let review = parse_broker_review(&html, &review_url(), &PageMetadata::default()).unwrap();
        assert_eq!(review.broker_name, "Interactive Brokers");
        assert_eq!(review.rating, Some(9.3));
        assert_eq!(review.pros, vec!["Wide product range"]);
        assert_eq!(review.cons, vec!["Complex platform"]);
        assert_eq!(
            review.sections.get("fees").map(String::as_str),
            Some("Very low trading fees.")
        );
        assert_eq!(
            review.unmapped_sections.get("Support Quality").map(String::as_str),
            Some("Mixed experiences.")
        );
    }
}
