//! Structured broker review data extracted from review pages

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Review payload for a `broker_review` page.
///
/// `sections` holds content mapped into the fixed section vocabulary (see
/// `infrastructure::parsing::sections`); headings that match no known
/// section are preserved verbatim in `unmapped_sections` so renamed site
/// sections are never silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerReview {
    pub broker_name: String,
    pub slug: String,
    /// Overall rating on a 0-10 scale, if the page carries one.
    pub rating: Option<f64>,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    pub sections: BTreeMap<String, String>,
    pub unmapped_sections: BTreeMap<String, String>,
    pub last_updated: Option<NaiveDate>,
}

impl BrokerReview {
    pub fn new(broker_name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            broker_name: broker_name.into(),
            slug: slug.into(),
            rating: None,
            pros: Vec::new(),
            cons: Vec::new(),
            sections: BTreeMap::new(),
            unmapped_sections: BTreeMap::new(),
            last_updated: None,
        }
    }
}
