//! Crawl bookkeeping types: page requests and duplicate fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ReviewRecord;

/// A single page to fetch.
///
/// Created by the locator (page 1) or by the frontier (page N+1) and consumed
/// exactly once by a crawl worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    url: String,
    page_no: u32,
}

impl CrawlRequest {
    pub fn new(url: impl Into<String>, page_no: u32) -> Self {
        Self {
            url: url.into(),
            page_no: page_no.max(1),
        }
    }

    /// The first page of a crawl.
    pub fn seed(url: impl Into<String>) -> Self {
        Self::new(url, 1)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 1-based page number.
    pub fn page_no(&self) -> u32 {
        self.page_no
    }
}

/// How review fingerprints are built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// (author, date, title). Two distinct reviews sharing all three collide.
    #[default]
    Byline,
    /// Byline plus a SHA-256 of the review body.
    Content,
}

impl FingerprintMode {
    pub fn fingerprint(&self, record: &ReviewRecord) -> Fingerprint {
        match self {
            Self::Byline => Fingerprint::byline(record),
            Self::Content => Fingerprint::with_content(record),
        }
    }
}

/// Composite key used to decide whether a review was already seen.
///
/// Absent components stay `None` and never compare equal to an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    author: Option<String>,
    date: Option<String>,
    title: Option<String>,
    body_hash: Option<String>,
}

impl Fingerprint {
    pub fn byline(record: &ReviewRecord) -> Self {
        Self {
            author: record.author.clone(),
            date: record.date.clone(),
            title: record.title.clone(),
            body_hash: None,
        }
    }

    pub fn with_content(record: &ReviewRecord) -> Self {
        let body_hash = record.review_body.as_deref().map(|body| {
            let mut hasher = Sha256::new();
            hasher.update(body.as_bytes());
            hex::encode(hasher.finalize())
        });

        Self {
            body_hash,
            ..Self::byline(record)
        }
    }
}
