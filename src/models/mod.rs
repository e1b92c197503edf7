//! Data models for carreviews.

mod crawl;
mod review;

pub use crawl::{CrawlRequest, Fingerprint, FingerprintMode};
pub use review::{CarInfo, RatingBreakdown, ReviewRecord};
