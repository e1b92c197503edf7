//! Concurrent crawl over paginated review listings.
//!
//! A fixed pool of workers pulls [`CrawlRequest`]s from a shared queue. Each
//! worker paces, fetches (with timeout and retries), runs [`process_page`]
//! synchronously, hands the admitted batch to the sink and enqueues whatever
//! the frontier decided. The crawl ends when the frontier says stop or when
//! nothing is queued or in flight.
//!
//! [`process_page`]: CrawlDriver::process_page

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::extract::ReviewExtractor;
use super::fetch::{FetchError, PageFetcher};
use super::frontier::{decide_next, CrawlLimits, NextAction, PageStats, StopReason};
use super::http_client::Pacer;
use super::ledger::DedupLedger;
use crate::config::Config;
use crate::models::{CrawlRequest, FingerprintMode, ReviewRecord};
use crate::sink::RecordSink;

/// Immutable per-crawl settings.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub concurrency: usize,
    /// Retries after the first failed attempt.
    pub max_request_retries: u32,
    pub request_timeout: Duration,
    pub pacer: Pacer,
    pub limits: CrawlLimits,
    pub fingerprint: FingerprintMode,
}

impl CrawlSettings {
    pub fn from_config(config: &Config, limits: CrawlLimits, pacer: Pacer) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_request_retries: config.max_request_retries,
            request_timeout: config.request_timeout(),
            pacer,
            limits,
            fingerprint: config.fingerprint,
        }
    }
}

/// How a crawl ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub saved: u64,
    pub pages_fetched: u64,
    /// Pages abandoned after exhausting their retries.
    pub pages_failed: u64,
    /// `None` when the queue drained without the frontier deciding to stop,
    /// e.g. after an abandoned page.
    pub stop_reason: Option<StopReason>,
}

/// Result of handling one fetched page.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    /// Newly admitted records, in document order.
    pub batch: Vec<ReviewRecord>,
    pub stats: PageStats,
    pub next: NextAction,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<CrawlRequest>,
    /// Queued plus in-flight requests.
    outstanding: usize,
    closed: bool,
}

/// Work queue shared by the workers.
#[derive(Debug, Default)]
struct CrawlQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl CrawlQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `false` if the queue is already closed.
    fn push(&self, request: CrawlRequest) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.pending.push_back(request);
            state.outstanding += 1;
        }
        self.notify.notify_waiters();
        true
    }

    /// Next request, or `None` once closed or fully drained.
    ///
    /// Every `Some` must be matched by one [`complete`](Self::complete).
    async fn next(&self) -> Option<CrawlRequest> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(request) = state.pending.pop_front() {
                    return Some(request);
                }
                if state.outstanding == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    fn complete(&self) {
        let drained = {
            let mut state = self.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            state.outstanding == 0
        };
        if drained {
            self.notify.notify_waiters();
        }
    }

    fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            let dropped = state.pending.len();
            state.pending.clear();
            state.outstanding = state.outstanding.saturating_sub(dropped);
        }
        self.notify.notify_waiters();
    }
}

/// Marks a popped request complete when dropped, even if the worker panics.
struct InFlight<'a>(&'a CrawlQueue);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.complete();
    }
}

struct DriverInner {
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn RecordSink>,
    extractor: ReviewExtractor,
    settings: CrawlSettings,
    ledger: DedupLedger,
    queue: CrawlQueue,
    pages_fetched: AtomicU64,
    pages_failed: AtomicU64,
    stop_reason: Mutex<Option<StopReason>>,
}

/// Runs one crawl. The ledger lives as long as the driver, so a driver
/// should not be reused for an unrelated crawl.
#[derive(Clone)]
pub struct CrawlDriver {
    inner: Arc<DriverInner>,
}

impl CrawlDriver {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn RecordSink>,
        extractor: ReviewExtractor,
        settings: CrawlSettings,
    ) -> Self {
        let ledger = DedupLedger::new(settings.fingerprint, settings.limits.results_wanted());
        Self {
            inner: Arc::new(DriverInner {
                fetcher,
                sink,
                extractor,
                settings,
                ledger,
                queue: CrawlQueue::default(),
                pages_fetched: AtomicU64::new(0),
                pages_failed: AtomicU64::new(0),
                stop_reason: Mutex::new(None),
            }),
        }
    }

    pub fn saved_count(&self) -> u64 {
        self.inner.ledger.saved_count()
    }

    /// Crawl from `entry_url` (page 1) until the frontier stops or the
    /// queue drains.
    pub async fn run(&self, entry_url: &str) -> CrawlSummary {
        let inner = &self.inner;
        let limits = inner.settings.limits;
        let workers = inner.settings.concurrency.max(1);
        info!(
            "Starting crawl at {} (want {} reviews, up to {} pages, {} workers)",
            entry_url,
            limits.results_wanted(),
            limits.max_pages(),
            workers
        );

        inner.queue.push(CrawlRequest::seed(entry_url));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(async move {
                inner.worker_loop(worker_id).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Crawl worker failed: {}", e);
            }
        }

        let summary = CrawlSummary {
            saved: inner.ledger.saved_count(),
            pages_fetched: inner.pages_fetched.load(Ordering::Relaxed),
            pages_failed: inner.pages_failed.load(Ordering::Relaxed),
            stop_reason: *inner.stop_reason.lock().unwrap_or_else(|e| e.into_inner()),
        };
        info!(
            "Crawl finished: {} reviews saved from {} pages ({} failed)",
            summary.saved, summary.pages_fetched, summary.pages_failed
        );
        summary
    }

    /// Extract, deduplicate and decide the next step for one fetched page.
    pub fn process_page(&self, request: &CrawlRequest, body: &str) -> PageOutcome {
        self.inner.process_page(request, body)
    }
}

impl DriverInner {
    async fn worker_loop(&self, worker_id: usize) {
        while let Some(request) = self.queue.next().await {
            let _in_flight = InFlight(&self.queue);
            let page_no = request.page_no();

            if self.ledger.goal_reached() {
                debug!(page = page_no, "Goal already reached, skipping {}", request.url());
                self.stop(StopReason::GoalReached);
                continue;
            }

            debug!(worker = worker_id, page = page_no, "Fetching {}", request.url());
            let body = match self.fetch_with_retries(&request).await {
                Some(body) => body,
                None => {
                    self.pages_failed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            self.pages_fetched.fetch_add(1, Ordering::Relaxed);

            let outcome = self.guarded(&request, || self.process_page(&request, &body));

            // The batch is written before the next page becomes visible to
            // other workers, so a pagination chain reaches the sink in order.
            if !outcome.batch.is_empty() {
                if let Err(e) = self.sink.push_batch(&outcome.batch).await {
                    error!(page = page_no, "Failed to write {} reviews: {}", outcome.batch.len(), e);
                }
            }

            match outcome.next {
                NextAction::Enqueue(next) => {
                    debug!(page = page_no, "Next page: {}", next.url());
                    self.queue.push(next);
                }
                NextAction::Stop(reason) => {
                    info!(page = page_no, "Stopping: {}", reason);
                    self.stop(reason);
                }
            }
        }
    }

    /// Run page processing, treating a panic as a page with zero records.
    ///
    /// Processing is synchronous, so the fetch timeout does not cover it.
    fn guarded<F>(&self, request: &CrawlRequest, process: F) -> PageOutcome
    where
        F: FnOnce() -> PageOutcome,
    {
        match std::panic::catch_unwind(AssertUnwindSafe(process)) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    page = request.page_no(),
                    "Failed to process {}; treating it as empty",
                    request.url()
                );
                let stats = PageStats {
                    page_no: request.page_no(),
                    current_url: request.url().to_string(),
                    container_count: 0,
                    next_link: None,
                    saved_count: self.ledger.saved_count(),
                };
                let next = decide_next(&stats, &self.settings.limits);
                PageOutcome {
                    batch: Vec::new(),
                    stats,
                    next,
                }
            }
        }
    }

    /// Record the first stop reason and close the queue.
    fn stop(&self, reason: StopReason) {
        self.stop_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_or_insert(reason);
        self.queue.close();
    }

    async fn fetch_with_retries(&self, request: &CrawlRequest) -> Option<String> {
        let attempts = self.settings.max_request_retries.saturating_add(1);
        let timeout = self.settings.request_timeout;

        for attempt in 1..=attempts {
            self.settings.pacer.wait().await;

            let result = match tokio::time::timeout(timeout, self.fetcher.fetch(request.url())).await
            {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(timeout)),
            };

            match result {
                Ok(body) => return Some(body),
                Err(e) => warn!(
                    page = request.page_no(),
                    "Fetch attempt {}/{} failed: {}", attempt, attempts, e
                ),
            }
        }

        error!(
            page = request.page_no(),
            "Giving up on {} after {} attempts",
            request.url(),
            attempts
        );
        None
    }

    fn process_page(&self, request: &CrawlRequest, body: &str) -> PageOutcome {
        let page_no = request.page_no();
        let page = self.extractor.extract(body, request.url());

        if page.is_empty_page() {
            warn!(page = page_no, "Page {}: No reviews found", page_no);
        }

        let candidates = page.records.len();
        let batch = self.ledger.admit_page(page.records);
        let saved_count = self.ledger.saved_count();
        info!(
            page = page_no,
            "Page {}: saved {} of {} reviews (total {})",
            page_no,
            batch.len(),
            candidates,
            saved_count
        );

        let stats = PageStats {
            page_no,
            current_url: request.url().to_string(),
            container_count: page.container_count,
            next_link: page.next_link,
            saved_count,
        };
        let next = decide_next(&stats, &self.settings.limits);

        PageOutcome { batch, stats, next }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::models::CarInfo;
    use crate::scrapers::extract::fixtures::{numbered_page, page_html};
    use crate::sink::{MemorySink, SinkError};

    const ENTRY: &str = "https://www.cars.com/research/honda-civic-2021/consumer-reviews/";

    fn page_url(n: u32) -> String {
        if n == 1 {
            ENTRY.to_string()
        } else {
            format!("{ENTRY}?page={n}")
        }
    }

    /// Serves canned pages; unknown URLs are 404s.
    #[derive(Default)]
    struct StubFetcher {
        pages: HashMap<String, String>,
        failures: Mutex<HashMap<String, u32>>,
        fetches: AtomicUsize,
        delay: Option<Duration>,
    }

    impl StubFetcher {
        fn with_page(mut self, n: u32, html: String) -> Self {
            self.pages.insert(page_url(n), html);
            self
        }

        /// Fail the first `times` fetches of page `n`.
        fn failing(self, n: u32, times: u32) -> Self {
            self.failures.lock().unwrap().insert(page_url(n), times);
            self
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(left) = failures.get_mut(url) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(FetchError::Other("connection reset".into()));
                    }
                }
            }
            self.pages.get(url).cloned().ok_or(FetchError::Status {
                status: 404,
                url: url.to_string(),
            })
        }
    }

    /// Holds up its first batch so a later page could overtake it.
    #[derive(Default)]
    struct SlowFirstSink {
        inner: MemorySink,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordSink for SlowFirstSink {
        async fn push_batch(&self, records: &[ReviewRecord]) -> Result<(), SinkError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            self.inner.push_batch(records).await
        }
    }

    struct FailingSink;

    #[async_trait]
    impl RecordSink for FailingSink {
        async fn push_batch(&self, _records: &[ReviewRecord]) -> Result<(), SinkError> {
            Err(SinkError::Io(std::io::Error::other("disk full")))
        }
    }

    fn settings(results_wanted: u32, max_pages: Option<u32>, concurrency: usize) -> CrawlSettings {
        CrawlSettings {
            concurrency,
            max_request_retries: 3,
            request_timeout: Duration::from_secs(5),
            pacer: Pacer::disabled(),
            limits: CrawlLimits::new(results_wanted, max_pages),
            fingerprint: FingerprintMode::Byline,
        }
    }

    fn extractor() -> ReviewExtractor {
        ReviewExtractor::new(CarInfo {
            car_make: Some("honda".into()),
            car_model: Some("civic".into()),
            car_year: Some(2021),
        })
    }

    /// Pages 1..=n with 10 reviews each, every page linking to the next.
    fn chained_site(n: u32) -> StubFetcher {
        (1..=n).fold(StubFetcher::default(), |fetcher, i| {
            let next = format!("?page={}", i + 1);
            fetcher.with_page(i, numbered_page(&format!("p{i}"), 10, Some(&next)))
        })
    }

    async fn crawl(
        fetcher: StubFetcher,
        settings: CrawlSettings,
    ) -> (CrawlSummary, Arc<StubFetcher>, Arc<MemorySink>) {
        let fetcher = Arc::new(fetcher);
        let sink = Arc::new(MemorySink::new());
        let driver = CrawlDriver::new(fetcher.clone(), sink.clone(), extractor(), settings);
        let summary = driver.run(ENTRY).await;
        (summary, fetcher, sink)
    }

    #[tokio::test]
    async fn test_stops_at_goal_with_hard_cutoff() {
        let (summary, fetcher, sink) = crawl(chained_site(5), settings(15, None, 1)).await;

        assert_eq!(summary.saved, 15);
        assert_eq!(summary.stop_reason, Some(StopReason::GoalReached));
        assert_eq!(fetcher.fetch_count(), 2);
        assert_eq!(sink.batch_sizes(), vec![10, 5]);
    }

    #[tokio::test]
    async fn test_goal_met_on_first_page_schedules_nothing() {
        let (summary, fetcher, sink) = crawl(chained_site(3), settings(10, None, 2)).await;

        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(summary.pages_fetched, 1);
        assert_eq!(summary.saved, 10);
        assert_eq!(summary.stop_reason, Some(StopReason::GoalReached));
        assert_eq!(sink.batch_sizes(), vec![10]);
    }

    #[tokio::test]
    async fn test_batches_reach_sink_in_page_order() {
        let fetcher = Arc::new(
            StubFetcher::default()
                .with_page(1, numbered_page("p1", 10, Some("?page=2")))
                .with_page(2, numbered_page("p2", 10, None)),
        );
        let sink = Arc::new(SlowFirstSink::default());
        let driver = CrawlDriver::new(fetcher, sink.clone(), extractor(), settings(100, Some(2), 2));
        let summary = driver.run(ENTRY).await;

        assert_eq!(summary.saved, 20);
        let records = sink.inner.records();
        assert_eq!(records.first().and_then(|r| r.author.as_deref()), Some("p1-0"));
        assert_eq!(records.last().and_then(|r| r.author.as_deref()), Some("p2-9"));
    }

    #[tokio::test]
    async fn test_processing_panic_counts_as_empty_page() {
        let driver = CrawlDriver::new(
            Arc::new(StubFetcher::default()),
            Arc::new(MemorySink::new()),
            extractor(),
            settings(100, None, 1),
        );
        let request = CrawlRequest::new(page_url(2), 2);
        let outcome = driver.inner.guarded(&request, || panic!("malformed page"));

        assert!(outcome.batch.is_empty());
        assert_eq!(outcome.stats.container_count, 0);
        assert_eq!(outcome.next, NextAction::Stop(StopReason::Starved));
    }

    #[tokio::test]
    async fn test_budget_limits_fetches() {
        let (summary, fetcher, sink) = crawl(chained_site(10), settings(100, Some(3), 2)).await;

        assert_eq!(fetcher.fetch_count(), 3);
        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(summary.saved, 30);
        assert_eq!(summary.stop_reason, Some(StopReason::BudgetExhausted));
        assert_eq!(sink.records().len(), 30);
    }

    #[tokio::test]
    async fn test_repeated_page_adds_nothing() {
        let page = numbered_page("same", 10, Some("?page=2"));
        let fetcher = StubFetcher::default()
            .with_page(1, page.clone())
            .with_page(2, page);
        let (summary, _, sink) = crawl(fetcher, settings(100, Some(2), 1)).await;

        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.saved, 10);
        assert_eq!(sink.batch_sizes(), vec![10]);
    }

    #[tokio::test]
    async fn test_empty_page_stops_even_with_next_link() {
        let fetcher = StubFetcher::default()
            .with_page(1, numbered_page("a", 10, Some("?page=2")))
            .with_page(2, page_html(&[], Some("?page=3")))
            .with_page(3, numbered_page("c", 10, None));
        let (summary, fetcher, _) = crawl(fetcher, settings(100, None, 1)).await;

        assert_eq!(summary.stop_reason, Some(StopReason::Starved));
        assert_eq!(fetcher.fetch_count(), 2);
        assert_eq!(summary.saved, 10);
    }

    #[tokio::test]
    async fn test_follows_synthesized_page_without_link() {
        let fetcher = StubFetcher::default()
            .with_page(1, numbered_page("a", 5, None))
            .with_page(2, numbered_page("b", 3, None));
        let (summary, _, sink) = crawl(fetcher, settings(100, None, 1)).await;

        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.saved, 8);
        assert_eq!(summary.stop_reason, Some(StopReason::NoMorePages));
        assert_eq!(sink.batch_sizes(), vec![5, 3]);
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let fetcher = StubFetcher::default()
            .with_page(1, numbered_page("a", 3, None))
            .failing(1, 2);
        let (summary, fetcher, _) = crawl(fetcher, settings(100, None, 1)).await;

        assert_eq!(fetcher.fetch_count(), 3);
        assert_eq!(summary.saved, 3);
        assert_eq!(summary.pages_failed, 0);
    }

    #[tokio::test]
    async fn test_abandons_after_retries() {
        let mut s = settings(100, None, 2);
        s.max_request_retries = 2;
        let (summary, fetcher, sink) = crawl(StubFetcher::default(), s).await;

        assert_eq!(fetcher.fetch_count(), 3);
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.pages_fetched, 0);
        assert_eq!(summary.saved, 0);
        assert_eq!(summary.stop_reason, None);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let fetcher = StubFetcher {
            delay: Some(Duration::from_millis(500)),
            ..Default::default()
        }
        .with_page(1, numbered_page("a", 3, None));
        let mut s = settings(100, None, 1);
        s.max_request_retries = 0;
        s.request_timeout = Duration::from_millis(20);

        let (summary, _, _) = crawl(fetcher, s).await;
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.saved, 0);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_abort() {
        let fetcher = Arc::new(chained_site(3));
        let driver = CrawlDriver::new(
            fetcher.clone(),
            Arc::new(FailingSink),
            extractor(),
            settings(100, Some(3), 1),
        );
        let summary = driver.run(ENTRY).await;

        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(summary.stop_reason, Some(StopReason::BudgetExhausted));
    }

    #[tokio::test]
    async fn test_concurrent_workers_never_overshoot() {
        let (summary, _, sink) = crawl(chained_site(10), settings(25, None, 4)).await;

        assert_eq!(summary.saved, 25);
        assert_eq!(sink.records().len(), 25);
        assert_eq!(summary.stop_reason, Some(StopReason::GoalReached));
    }

    #[tokio::test]
    async fn test_process_page_outcome() {
        let driver = CrawlDriver::new(
            Arc::new(StubFetcher::default()),
            Arc::new(MemorySink::new()),
            extractor(),
            settings(100, None, 1),
        );
        let request = CrawlRequest::new(page_url(2), 2);
        let outcome = driver.process_page(&request, &numbered_page("x", 6, Some("?page=3")));

        assert_eq!(outcome.batch.len(), 6);
        assert_eq!(outcome.stats.container_count, 6);
        assert_eq!(outcome.stats.saved_count, 6);
        assert_eq!(
            outcome.next,
            NextAction::Enqueue(CrawlRequest::new(page_url(3), 3))
        );
        assert_eq!(driver.saved_count(), 6);

        // The same page again admits nothing but still paginates.
        let again = driver.process_page(&request, &numbered_page("x", 6, Some("?page=3")));
        assert!(again.batch.is_empty());
        assert_eq!(again.stats.saved_count, 6);
    }

    #[tokio::test]
    async fn test_queue_drains_when_idle() {
        let queue = CrawlQueue::default();
        queue.push(CrawlRequest::seed(ENTRY));

        let first = queue.next().await;
        assert!(first.is_some());
        queue.complete();
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_work() {
        let queue = CrawlQueue::default();
        queue.push(CrawlRequest::seed(ENTRY));
        queue.close();

        assert!(queue.next().await.is_none());
        assert!(!queue.push(CrawlRequest::new(page_url(2), 2)));
    }
}
