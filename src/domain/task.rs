//! Crawl tasks and URL categorization

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A URL discovered by the sitemap collector, consumed once by the
/// orchestrator. Not mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    pub url: String,
    pub discovered_at: DateTime<Utc>,
    /// The sitemap document this URL came from.
    pub source: String,
}

impl CrawlTask {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            discovered_at: Utc::now(),
            source: source.into(),
        }
    }
}

/// Coarse site-area buckets used for discovery diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UrlCategory {
    BrokerReviews,
    Blog,
    Guides,
    Compare,
    News,
    Tools,
    About,
    Legal,
    Homepage,
    Other,
}

impl UrlCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrokerReviews => "broker-reviews",
            Self::Blog => "blog",
            Self::Guides => "guides",
            Self::Compare => "compare",
            Self::News => "news",
            Self::Tools => "tools",
            Self::About => "about",
            Self::Legal => "legal",
            Self::Homepage => "homepage",
            Self::Other => "other",
        }
    }

    /// Classify a URL path by simple substring rules. First match wins.
    pub fn from_path(path: &str) -> Self {
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            return Self::Homepage;
        }
        if path.contains("/broker-reviews") {
            Self::BrokerReviews
        } else if path.contains("/blog") {
            Self::Blog
        } else if path.contains("/education") || path.contains("/guide") {
            Self::Guides
        } else if path.contains("/compare") {
            Self::Compare
        } else if path.contains("/news") {
            Self::News
        } else if path.contains("/tools") || path.contains("/calculator") {
            Self::Tools
        } else if path.contains("/about") || path.contains("/team") || path.contains("/methodology")
        {
            Self::About
        } else if path.contains("/terms")
            || path.contains("/privacy")
            || path.contains("/cookie-policy")
            || path.contains("/legal")
        {
            Self::Legal
        } else {
            Self::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_by_path_substring() {
        assert_eq!(
            UrlCategory::from_path("/broker-reviews/etoro/"),
            UrlCategory::BrokerReviews
        );
        assert_eq!(UrlCategory::from_path("/blog/intro/"), UrlCategory::Blog);
        assert_eq!(UrlCategory::from_path("/education/basics"), UrlCategory::Guides);
        assert_eq!(UrlCategory::from_path("/compare/etoro-vs-xtb"), UrlCategory::Compare);
        assert_eq!(UrlCategory::from_path("/privacy"), UrlCategory::Legal);
        assert_eq!(UrlCategory::from_path("/"), UrlCategory::Homepage);
        assert_eq!(UrlCategory::from_path(""), UrlCategory::Homepage);
        assert_eq!(UrlCategory::from_path("/something-else"), UrlCategory::Other);
    }
}
