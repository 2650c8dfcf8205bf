//! General page parsing: HTML + URL -> structured page data
//!
//! Pure function of its inputs; all I/O happens in the fetch layer. The
//! extracted plain text is computed after stripping non-content markup so
//! the content hash survives layout-only site changes.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::warn;
use url::Url;

use crate::domain::{PageKind, PageMetadata, ParsedPage};
use crate::infrastructure::error::CrawlerError;
use crate::infrastructure::hashing::sha256_hex;
use crate::infrastructure::parsing::normalize_whitespace;
use crate::infrastructure::parsing::review_parser::{parse_broker_review, review_slug};

/// Markup removed before text extraction: scripts, styles, embedded
/// documents, chrome (nav/header/footer/aside), cookie banners and ad
/// slots. Applied on the raw HTML because a parsed scraper DOM is
/// immutable.
static STRIP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)<script\b[^>]*>.*?</script>",
        r"(?is)<style\b[^>]*>.*?</style>",
        r"(?is)<noscript\b[^>]*>.*?</noscript>",
        r"(?is)<svg\b[^>]*>.*?</svg>",
        r"(?is)<iframe\b[^>]*>.*?</iframe>",
        r"(?is)<nav\b[^>]*>.*?</nav>",
        r"(?is)<header\b[^>]*>.*?</header>",
        r"(?is)<footer\b[^>]*>.*?</footer>",
        r"(?is)<aside\b[^>]*>.*?</aside>",
        r"(?is)<form\b[^>]*>.*?</form>",
        r#"(?is)<div\b[^>]*(?:class|id)\s*=\s*["'][^"']*(?:cookie|consent|banner|advert|ad-slot)[^"']*["'][^>]*>.*?</div>"#,
        r"(?s)<!--.*?-->",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static HTML_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("html").unwrap());
static CANONICAL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="canonical"]"#).unwrap());

/// Classify a page by its URL path.
pub fn classify_page_kind(url: &Url) -> PageKind {
    if review_slug(url).is_some() {
        return PageKind::BrokerReview;
    }
    let path = url.path();
    if path.contains("/blog") {
        PageKind::Blog
    } else if path.contains("/education") || path.contains("/guide") {
        PageKind::Guide
    } else if path.contains("/about") {
        PageKind::About
    } else if path.contains("/contact") {
        PageKind::Contact
    } else {
        PageKind::Page
    }
}

/// Parser for crawled pages. Stateless; share one instance across workers.
#[derive(Debug, Default)]
pub struct PageParser;

impl PageParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a fetched page into its structured form.
    ///
    /// Metadata extraction never fails over missing tags; review extraction
    /// failures degrade to an omitted payload rather than failing the page.
    pub fn parse(&self, html: &str, url: &str) -> Result<ParsedPage, CrawlerError> {
        let parsed_url = Url::parse(url).map_err(|e| CrawlerError::Parse {
            url: url.to_string(),
            message: format!("invalid URL: {e}"),
        })?;

        let document = Html::parse_document(html);
        let kind = classify_page_kind(&parsed_url);

        let mut metadata = self.extract_metadata(&document);
        metadata.page_kind = Some(kind);

        let text_content = self.extract_text(html);
        let sha256 = sha256_hex(&text_content);

        let review = if kind == PageKind::BrokerReview {
            match parse_broker_review(&document, &parsed_url, &metadata) {
                Ok(review) => Some(review),
                // The URL pattern said review but extraction disagreed;
                // keep the page, drop the payload.
                Err(CrawlerError::InvalidPageKind { .. }) => None,
                Err(error) => {
                    warn!(url, %error, "review extraction failed, omitting payload");
                    None
                }
            }
        } else {
            None
        };

        let title = if metadata.title.is_empty() {
            metadata.og_title.clone()
        } else {
            metadata.title.clone()
        };

        Ok(ParsedPage {
            url: url.to_string(),
            title,
            text_content,
            sha256,
            metadata,
            review,
        })
    }

    /// Plain text of the page with non-content markup stripped.
    fn extract_text(&self, html: &str) -> String {
        let mut stripped = html.to_string();
        for pattern in STRIP_PATTERNS.iter() {
            stripped = pattern.replace_all(&stripped, " ").into_owned();
        }

        let document = Html::parse_document(&stripped);
        let text = match document.select(&BODY_SELECTOR).next() {
            Some(body) => body.text().collect::<String>(),
            None => document.root_element().text().collect::<String>(),
        };
        normalize_whitespace(&text)
    }

    fn extract_metadata(&self, document: &Html) -> PageMetadata {
        PageMetadata {
            title: document
                .select(&TITLE_SELECTOR)
                .next()
                .map(|t| normalize_whitespace(&t.text().collect::<String>()))
                .unwrap_or_default(),
            description: meta_by_name(document, "description"),
            keywords: meta_by_name(document, "keywords"),
            author: meta_by_name(document, "author"),
            published_time: meta_by_property(document, "article:published_time"),
            modified_time: meta_by_property(document, "article:modified_time"),
            canonical_url: document
                .select(&CANONICAL_SELECTOR)
                .next()
                .and_then(|link| link.value().attr("href"))
                .map(|href| href.trim().to_string())
                .unwrap_or_default(),
            og_title: meta_by_property(document, "og:title"),
            og_description: meta_by_property(document, "og:description"),
            og_image: meta_by_property(document, "og:image"),
            og_type: meta_by_property(document, "og:type"),
            twitter_card: meta_by_name(document, "twitter:card"),
            twitter_title: meta_by_name(document, "twitter:title"),
            twitter_description: meta_by_name(document, "twitter:description"),
            language: document
                .select(&HTML_SELECTOR)
                .next()
                .and_then(|html| html.value().attr("lang"))
                .map(|lang| lang.trim().to_string())
                .unwrap_or_default(),
            page_kind: None,
        }
    }
}

fn meta_by_name(document: &Html, name: &str) -> String {
    meta_content(document, "name", name)
}

fn meta_by_property(document: &Html, property: &str) -> String {
    meta_content(document, "property", property)
}

fn meta_content(document: &Html, attr: &str, value: &str) -> String {
    let Ok(selector) = Selector::parse(&format!(r#"meta[{attr}="{value}"]"#)) else {
        return String::new();
    };
    document
        .select(&selector)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(normalize_whitespace)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVIEW_HTML: &str = r#"<!DOCTYPE html>
        <html lang="en">
        <head>
            <title>  eToro Review 2024  </title>
            <meta name="description" content="Full eToro review.">
            <meta property="og:title" content="eToro Review">
            <meta property="article:modified_time" content="2024-03-20T08:00:00+00:00">
            <link rel="canonical" href="https://brokerchooser.com/broker-reviews/etoro/">
            <script>window.tracker = {};</script>
            <style>.hidden { display: none; }</style>
        </head>
        <body>
            <nav><a href="/">Home</a></nav>
            <div class="cookie-banner">We use cookies.</div>
            <h1>eToro Review</h1>
            <div class="rating-value">8.5</div>
            <div class="pros"><ul><li>Social trading</li></ul></div>
            <h2>Fees</h2>
            <p>Zero commission on stocks.</p>
            <footer>Copyright</footer>
        </body>
        </html>"#;

    #[test]
    fn url_paths_classify_into_page_kinds() {
        let cases = [
            ("https://brokerchooser.com/broker-reviews/etoro/", PageKind::BrokerReview),
            ("https://brokerchooser.com/blog/intro/", PageKind::Blog),
            ("https://brokerchooser.com/education/basics/", PageKind::Guide),
            ("https://brokerchooser.com/about/", PageKind::About),
            ("https://brokerchooser.com/contact/", PageKind::Contact),
            ("https://brokerchooser.com/anything/", PageKind::Page),
            // Bare prefix has no slug, so it is not a review page.
            ("https://brokerchooser.com/broker-reviews/", PageKind::Page),
        ];
        for (url, expected) in cases {
            let url = Url::parse(url).unwrap();
            assert_eq!(classify_page_kind(&url), expected, "for {url}");
        }
    }

    #[test]
    fn review_page_parses_with_payload_and_metadata() {
        let parser = PageParser::new();
        let parsed = parser
            .parse(REVIEW_HTML, "https://brokerchooser.com/broker-reviews/etoro/")
            .unwrap();

        assert_eq!(parsed.title, "eToro Review 2024");
        assert_eq!(parsed.metadata.description, "Full eToro review.");
        assert_eq!(parsed.metadata.language, "en");
        assert_eq!(parsed.metadata.page_kind, Some(PageKind::BrokerReview));
        assert_eq!(
            parsed.metadata.canonical_url,
            "https://brokerchooser.com/broker-reviews/etoro/"
        );

        let review = parsed.review.expect("review payload expected");
        assert_eq!(review.broker_name, "Etoro");
        assert_eq!(review.rating, Some(8.5));
        assert_eq!(review.pros, vec!["Social trading"]);
    }

    #[test]
    fn stripped_markup_never_reaches_the_text_content() {
        let parser = PageParser::new();
        let parsed = parser
            .parse(REVIEW_HTML, "https://brokerchooser.com/broker-reviews/etoro/")
            .unwrap();

        assert!(parsed.text_content.contains("Zero commission on stocks."));
        assert!(!parsed.text_content.contains("window.tracker"));
        assert!(!parsed.text_content.contains("display: none"));
        assert!(!parsed.text_content.contains("We use cookies."));
        assert!(!parsed.text_content.contains("Copyright"));
        assert!(!parsed.text_content.contains("Home"));
    }

    #[test]
    fn hash_is_stable_against_layout_only_changes() {
        let parser = PageParser::new();
        let url = "https://brokerchooser.com/blog/intro/";
        let original = "<html><body><p>Same content.</p></body></html>";
        let reskinned =
            "<html><body><script>newTracker()</script><p>Same   content.</p><footer>new footer</footer></body></html>";

        let first = parser.parse(original, url).unwrap();
        let second = parser.parse(reskinned, url).unwrap();
        assert_eq!(first.sha256, second.sha256);

        let changed = parser
            .parse("<html><body><p>Same content!</p></body></html>", url)
            .unwrap();
        assert_ne!(first.sha256, changed.sha256);
    }

    #[test]
    fn non_review_page_omits_the_payload() {
        let parser = PageParser::new();
        let parsed = parser
            .parse(
                "<html><head><title>Blog</title></head><body><p>Post</p></body></html>",
                "https://brokerchooser.com/blog/intro/",
            )
            .unwrap();
        assert!(parsed.review.is_none());
        assert_eq!(parsed.metadata.page_kind, Some(PageKind::Blog));
    }

    #[test]
    fn missing_tags_default_to_empty_strings() {
        let parser = PageParser::new();
        let parsed = parser
            .parse("<html><body>bare</body></html>", "https://brokerchooser.com/x/")
            .unwrap();
        assert!(parsed.metadata.description.is_empty());
        assert!(parsed.metadata.og_title.is_empty());
        assert!(parsed.metadata.language.is_empty());
        assert!(parsed.title.is_empty());
    }
}
