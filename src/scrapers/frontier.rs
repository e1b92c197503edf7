//! Next-page decisions for a paginated review crawl.

use std::fmt;

use thiserror::Error;
use tracing::warn;
use url::Url;

use super::extract::strip_query;
use crate::models::CrawlRequest;

/// Pages with at least this many containers are trusted enough to guess
/// the next page URL when no explicit link is present.
pub const MIN_CONTAINERS_FOR_SYNTHESIS: usize = 5;

/// Assumed reviews per listing page when deriving a page budget.
const REVIEWS_PER_PAGE: u32 = 10;
/// Extra pages on top of the derived budget.
const SAFETY_PAGES: u32 = 2;

/// Target record count and page budget for one crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlLimits {
    results_wanted: u32,
    max_pages: u32,
}

impl CrawlLimits {
    /// `max_pages` defaults to `ceil(results_wanted / 10) + 2`; supplied
    /// values are clamped to at least one page.
    pub fn new(results_wanted: u32, max_pages: Option<u32>) -> Self {
        let results_wanted = results_wanted.max(1);
        let max_pages = match max_pages {
            Some(n) => n.max(1),
            None => Self::auto_max_pages(results_wanted),
        };
        Self {
            results_wanted,
            max_pages,
        }
    }

    pub fn auto_max_pages(results_wanted: u32) -> u32 {
        results_wanted.max(1).div_ceil(REVIEWS_PER_PAGE) + SAFETY_PAGES
    }

    pub fn results_wanted(&self) -> u32 {
        self.results_wanted
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }
}

/// What one processed page looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStats {
    pub page_no: u32,
    pub current_url: String,
    pub container_count: usize,
    pub next_link: Option<String>,
    /// Crawl-wide saved count after this page's batch was admitted.
    pub saved_count: u64,
}

/// Why the frontier stopped following pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    GoalReached,
    BudgetExhausted,
    /// The page had no review containers.
    Starved,
    /// No next link and too few containers to guess one.
    NoMorePages,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::GoalReached => write!(f, "goal reached"),
            StopReason::BudgetExhausted => write!(f, "page budget exhausted"),
            StopReason::Starved => write!(f, "no reviews on page"),
            StopReason::NoMorePages => write!(f, "no more pages"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Stop(StopReason),
    Enqueue(CrawlRequest),
}

/// Failure to build a next-page URL.
#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("cannot parse page URL {url}: {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("cannot resolve next link {href}: {source}")]
    NextLink {
        href: String,
        #[source]
        source: url::ParseError,
    },
}

/// Decide whether to stop or which page to fetch next.
///
/// A page with zero containers stops the crawl even when it carries a
/// next link.
pub fn decide_next(stats: &PageStats, limits: &CrawlLimits) -> NextAction {
    if stats.saved_count >= u64::from(limits.results_wanted) {
        return NextAction::Stop(StopReason::GoalReached);
    }
    if stats.page_no >= limits.max_pages {
        return NextAction::Stop(StopReason::BudgetExhausted);
    }
    if stats.container_count == 0 {
        return NextAction::Stop(StopReason::Starved);
    }

    match next_page_url(stats) {
        Ok(Some(url)) => NextAction::Enqueue(CrawlRequest::new(url, stats.page_no + 1)),
        Ok(None) => NextAction::Stop(StopReason::NoMorePages),
        Err(e) => {
            warn!(page = stats.page_no, "Pagination error: {}", e);
            NextAction::Stop(StopReason::NoMorePages)
        }
    }
}

fn next_page_url(stats: &PageStats) -> Result<Option<String>, PaginationError> {
    if let Some(ref href) = stats.next_link {
        let base = Url::parse(&stats.current_url).map_err(|source| PaginationError::BaseUrl {
            url: stats.current_url.clone(),
            source,
        })?;
        let next = base.join(href).map_err(|source| PaginationError::NextLink {
            href: href.clone(),
            source,
        })?;
        return Ok(Some(next.to_string()));
    }

    if stats.container_count >= MIN_CONTAINERS_FOR_SYNTHESIS {
        return synthesize_next_url(&stats.current_url, stats.page_no + 1).map(Some);
    }

    Ok(None)
}

/// `<page url without query>?page=<n>`.
pub fn synthesize_next_url(current_url: &str, next_page: u32) -> Result<String, PaginationError> {
    let base = strip_query(current_url);
    Url::parse(base).map_err(|source| PaginationError::BaseUrl {
        url: base.to_string(),
        source,
    })?;
    Ok(format!("{}?page={}", base, next_page))
}
