//! Data-driven mapping of review headings to named sections
//!
//! The section vocabulary is a prioritized table of (section key, keyword
//! set) pairs evaluated in fixed order; adding a section or a keyword is an
//! additive table change, not new branching. Headings that match nothing
//! land verbatim in the unmapped bucket so renamed site sections are never
//! silently lost.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

use crate::infrastructure::parsing::normalize_whitespace;

/// Fixed section vocabulary, first match wins.
pub const SECTION_TABLE: &[(&str, &[&str])] = &[
    ("fees", &["fees", "costs", "pricing", "commission", "spreads"]),
    ("safety", &["safety", "is it safe", "regulation", "regulated", "investor protection"]),
    ("account_opening", &["account opening", "open an account", "registration", "sign-up"]),
    ("deposit_withdrawal", &["deposit", "withdrawal", "funding"]),
    ("web_platform", &["web trading platform", "web platform", "trading platform"]),
    ("mobile_app", &["mobile app", "mobile trading", "mobile platform"]),
    ("desktop_platform", &["desktop trading platform", "desktop platform"]),
    ("markets_products", &["markets and products", "product selection", "instruments", "asset classes"]),
    ("research", &["research", "market analysis", "analysis tools"]),
    ("education", &["education", "educational", "learning materials"]),
    ("customer_service", &["customer service", "customer support", "contact support"]),
    ("account_types", &["account types", "account options"]),
    ("trading_conditions", &["trading conditions", "leverage", "margin requirements"]),
    ("company_background", &["company background", "about the company", "company history"]),
    ("ratings", &["ratings", "how we rate", "scoring"]),
    ("competitors", &["competitors", "alternatives", "compared to"]),
    ("bottom_line", &["bottom line", "verdict", "final thoughts", "conclusion"]),
    ("overview", &["overview", "summary", "at a glance"]),
    ("faq", &["faq", "frequently asked questions"]),
];

static HEADING_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, h4").unwrap());

/// Map a heading to its section key, or `None` for the unmapped bucket.
pub fn map_heading(heading: &str) -> Option<&'static str> {
    let heading = heading.to_lowercase();
    SECTION_TABLE
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| heading.contains(k)))
        .map(|(key, _)| *key)
}

fn is_heading(element: &ElementRef) -> bool {
    matches!(element.value().name(), "h1" | "h2" | "h3" | "h4")
}

/// Text of everything between a heading and the next heading.
pub(crate) fn content_after_heading(heading: ElementRef) -> String {
    let mut parts: Vec<String> = Vec::new();
    for sibling in heading.next_siblings() {
        if let Some(element) = ElementRef::wrap(sibling) {
            if is_heading(&element) {
                break;
            }
            let text = normalize_whitespace(&element.text().collect::<String>());
            if !text.is_empty() {
                parts.push(text);
            }
        } else if let Some(text) = sibling.value().as_text() {
            let text = normalize_whitespace(text);
            if !text.is_empty() {
                parts.push(text);
            }
        }
    }
    parts.join(" ")
}

/// Scan every heading of a review page and bucket its following content.
///
/// Returns (mapped sections, unmapped sections). Content for a section key
/// that appears under several headings is concatenated.
pub fn extract_sections(
    document: &Html,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut mapped: BTreeMap<String, String> = BTreeMap::new();
    let mut unmapped: BTreeMap<String, String> = BTreeMap::new();

    for heading in document.select(&HEADING_SELECTOR) {
        let heading_text = normalize_whitespace(&heading.text().collect::<String>());
        if heading_text.is_empty() {
            continue;
        }
        let content = content_after_heading(heading);
        if content.is_empty() {
            continue;
        }

        let bucket = match map_heading(&heading_text) {
            Some(key) => mapped.entry(key.to_string()),
            None => unmapped.entry(heading_text),
        };
        bucket
            .and_modify(|existing| {
                existing.push(' ');
                existing.push_str(&content);
            })
            .or_insert(content);
    }

    (mapped, unmapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_the_full_vocabulary() {
        assert_eq!(SECTION_TABLE.len(), 19);
    }

    #[test]
    fn headings_map_through_the_keyword_table() {
        assert_eq!(map_heading("eToro fees and charges"), Some("fees"));
        assert_eq!(map_heading("Is eToro safe?"), Some("safety"));
        assert_eq!(map_heading("Mobile app experience"), Some("mobile_app"));
        assert_eq!(map_heading("Customer service"), Some("customer_service"));
        assert_eq!(map_heading("Support Quality"), None);
    }

    #[test]
    fn earlier_table_entries_win_on_ambiguous_headings() {
        // "fees" precedes "overview" in the table.
        assert_eq!(map_heading("Fees overview"), Some("fees"));
    }

    #[test]
    fn sections_are_split_at_the_next_heading() {
        let html = Html::parse_document(
            r#"<body>
                <h2>Fees</h2>
                <p>Low fees overall.</p>
                <p>No inactivity fee.</p>
                <h2>Is it safe?</h2>
                <p>Regulated by the FCA.</p>
            </body>"#,
        );

        let (mapped, unmapped) = extract_sections(&html);
        assert_eq!(mapped.get("fees").map(String::as_str), Some("Low fees overall. No inactivity fee."));
        assert_eq!(mapped.get("safety").map(String::as_str), Some("Regulated by the FCA."));
        assert!(unmapped.is_empty());
    }

    #[test]
    fn unknown_headings_are_preserved_verbatim() {
        let html = Html::parse_document(
            r#"<body>
                <h2>Support Quality</h2>
                <p>Phone support answers in minutes.</p>
            </body>"#,
        );

        let (mapped, unmapped) = extract_sections(&html);
        assert!(mapped.is_empty());
        assert_eq!(
            unmapped.get("Support Quality").map(String::as_str),
            Some("Phone support answers in minutes.")
        );
    }
}
