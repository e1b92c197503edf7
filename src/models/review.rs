//! Review records and the car metadata stamped onto them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Category name (lowercased) to rating, e.g. `"comfort" => 4.0`.
pub type RatingBreakdown = BTreeMap<String, f64>;

/// Canonical car metadata for a crawl.
///
/// Derived once from the entry URL (or the raw input when the URL does not
/// follow the research path layout) and never changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarInfo {
    pub car_make: Option<String>,
    pub car_model: Option<String>,
    pub car_year: Option<u32>,
}

/// A single consumer review extracted from a listing page.
///
/// Every field is always serialized. Values that were not found on the page
/// are written as `null` rather than omitted, so consumers can tell a missing
/// rating apart from a rating of zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub title: Option<String>,
    pub rating: Option<f64>,
    /// Reviewer name with the leading "By " removed.
    pub author: Option<String>,
    /// Review date exactly as displayed on the page.
    pub date: Option<String>,
    pub review_type: Option<String>,
    pub recommendation: Option<String>,
    pub review_body: Option<String>,
    pub rating_breakdown: Option<RatingBreakdown>,
    #[serde(flatten)]
    pub car: CarInfo,
    /// Page URL with the query string removed.
    pub url: String,
}

impl ReviewRecord {
    /// Create an empty record for a page; all review fields start absent.
    pub fn new(car: CarInfo, url: String) -> Self {
        Self {
            title: None,
            rating: None,
            author: None,
            date: None,
            review_type: None,
            recommendation: None,
            review_body: None,
            rating_breakdown: None,
            car,
            url,
        }
    }
}
