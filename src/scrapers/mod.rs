//! Crawling and extraction for cars.com consumer reviews.

pub mod driver;
pub mod extract;
pub mod fetch;
pub mod frontier;
mod http_client;
pub mod ledger;
pub mod locator;

pub use driver::{CrawlDriver, CrawlSettings, CrawlSummary, PageOutcome};
pub use extract::{PageExtraction, ReviewExtractor};
pub use fetch::{FetchError, PageFetcher};
pub use frontier::{CrawlLimits, NextAction, PageStats, PaginationError, StopReason};
pub use http_client::{
    resolve_user_agent, HttpClient, Pacer, PacingConfig, PacingStats, IMPERSONATE_USER_AGENTS,
    USER_AGENT,
};
pub use ledger::DedupLedger;
pub use locator::{build_review_url, extract_car_info, resolve_entry};
