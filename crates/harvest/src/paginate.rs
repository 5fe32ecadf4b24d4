//! Cursor pagination driver.
//!
//! Drives one `(query, window)` result set from the first page until the API
//! stops returning a `next_token`:
//!
//! ```text
//! START -> FETCHING -> (AGGREGATING -> FETCHING)* -> DONE
//!              |  ^
//!              v  |
//!            BACKOFF            (rate limited; same cursor is retried)
//!
//! FETCHING -> ABORTED           (remote/transport/schema failure, retry budget)
//! any wait -> CANCELLED         (cancellation token fired)
//! ```
//!
//! Partial aggregate state is never discarded: an early stop yields
//! [`Outcome::Partial`] carrying whatever was folded so far.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::Aggregator;
use crate::error::{FetchFailure, HarvestError, Result};
use crate::twitter::{Cursor, Page, PageFetcher, PageRequest, Query, Record, TimeWindow};

/// Default rate-limit cool-down: one 15 minute window plus a small buffer.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15 * 60 + 5);

/// Default number of consecutive rate-limit signals tolerated per page.
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Default delay between successful pages.
pub const DEFAULT_PAGE_PACING: Duration = Duration::from_millis(800);

/// A source of pages for one result set. The driver owns the cursor.
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch(&self, cursor: Option<&Cursor>) -> Result<Page<T>, FetchFailure>;
}

/// Binds a fetcher to one `(query, window)` pair.
pub struct QueryPages<'a, F> {
    fetcher: &'a F,
    query: &'a Query,
    window: &'a TimeWindow,
    page_size: u32,
}

impl<'a, F: PageFetcher> QueryPages<'a, F> {
    #[must_use]
    pub fn new(fetcher: &'a F, query: &'a Query, window: &'a TimeWindow, page_size: u32) -> Self {
        Self {
            fetcher,
            query,
            window,
            page_size,
        }
    }
}

#[async_trait]
impl<'a, F: PageFetcher, R: Record> PageSource<R> for QueryPages<'a, F> {
    async fn fetch(&self, cursor: Option<&Cursor>) -> Result<Page<R>, FetchFailure> {
        let request = PageRequest {
            query: self.query,
            window: self.window,
            page_size: self.page_size,
            cursor,
        };
        self.fetcher.fetch_page::<R>(&request).await
    }
}

/// What to do with a loop that stopped early.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AbortPolicy {
    /// Return the partial aggregate with its stop reason.
    #[default]
    KeepPartial,
    /// Turn an early stop into an error.
    Propagate,
}

/// Pacing, backoff and retry settings for one loop.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Delay after each successful page.
    pub page_pacing: Duration,
    /// Cool-down after the first rate-limit signal.
    pub cooldown: Duration,
    /// Multiplier applied per consecutive rate-limit signal (1.0 = fixed).
    pub backoff_multiplier: f32,
    /// Upper bound for the backed-off cool-down. Never below `cooldown`.
    pub max_cooldown: Duration,
    /// Consecutive rate-limit signals tolerated before giving up.
    pub max_rate_limit_retries: u32,
    /// Stop after this many pages even if more are available.
    pub max_pages: Option<usize>,
    /// Early-stop policy for [`Paginator::run_strict`].
    pub abort_policy: AbortPolicy,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_pacing: DEFAULT_PAGE_PACING,
            cooldown: DEFAULT_COOLDOWN,
            backoff_multiplier: 1.0,
            max_cooldown: Duration::from_secs(60 * 60), // 1 hour
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            max_pages: None,
            abort_policy: AbortPolicy::KeepPartial,
        }
    }
}

impl PaginationConfig {
    /// Cool-down before retry number `attempt` (1-based).
    #[must_use]
    pub fn cooldown_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let cap = self.cooldown.max(self.max_cooldown);
        let base_secs = self.cooldown.as_secs_f64();
        let backoff_secs = base_secs * f64::from(self.backoff_multiplier).powi(attempt as i32 - 1);
        let capped_secs = backoff_secs.min(cap.as_secs_f64());

        Duration::try_from_secs_f64(capped_secs.max(0.0)).unwrap_or(cap)
    }
}

/// Why a loop stopped before exhausting the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Non-recoverable fetch failure.
    Fetch(FetchFailure),
    /// Rate limited more times in a row than the budget allows.
    RetryBudgetExceeded { attempts: u32 },
    /// Cancellation token fired.
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(failure) => write!(f, "{failure}"),
            Self::RetryBudgetExceeded { attempts } => {
                write!(f, "still rate limited after {attempts} retries")
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StopReason {
    /// Convert into a scoped error.
    #[must_use]
    pub fn into_error(self, scope: &str) -> HarvestError {
        let scope = scope.to_string();
        match self {
            Self::Fetch(source) => HarvestError::Fetch { scope, source },
            Self::RetryBudgetExceeded { attempts } => {
                HarvestError::RetryBudgetExceeded { scope, attempts }
            }
            Self::Cancelled => HarvestError::Cancelled { scope },
        }
    }
}

/// Aggregate of a loop that stopped early.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult<T> {
    pub data: T,
    pub pages: usize,
    pub reason: StopReason,
}

/// Terminal state of one pagination loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Cursor exhausted (or page limit reached).
    Complete { data: T, pages: usize },
    /// Stopped early; `data` holds everything folded before the stop.
    Partial(PartialResult<T>),
}

impl<T> Outcome<T> {
    /// Aggregate, regardless of how the loop ended.
    #[must_use]
    pub fn data(&self) -> &T {
        match self {
            Self::Complete { data, .. } => data,
            Self::Partial(partial) => &partial.data,
        }
    }

    /// Number of pages folded.
    #[must_use]
    pub fn pages(&self) -> usize {
        match self {
            Self::Complete { pages, .. } => *pages,
            Self::Partial(partial) => partial.pages,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    /// Stop reason of an early stop.
    #[must_use]
    pub fn stop_reason(&self) -> Option<&StopReason> {
        match self {
            Self::Complete { .. } => None,
            Self::Partial(partial) => Some(&partial.reason),
        }
    }

    /// Split into the aggregate and the optional stop reason.
    #[must_use]
    pub fn into_parts(self) -> (T, usize, Option<StopReason>) {
        match self {
            Self::Complete { data, pages } => (data, pages, None),
            Self::Partial(PartialResult {
                data,
                pages,
                reason,
            }) => (data, pages, Some(reason)),
        }
    }
}

/// Runs pagination loops with shared pacing/backoff settings.
#[derive(Debug, Clone)]
pub struct Paginator {
    config: PaginationConfig,
    cancel: CancellationToken,
}

impl Paginator {
    #[must_use]
    pub fn new(config: PaginationConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Observe an external cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token checked before each request and during every wait.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drive `source` to exhaustion, folding every page into `aggregator`.
    pub async fn run<A, S>(&self, source: &S, mut aggregator: A) -> Outcome<A::Output>
    where
        A: Aggregator + Send,
        S: PageSource<A::Item> + ?Sized,
    {
        let mut cursor: Option<Cursor> = None;
        let mut pages = 0usize;
        let mut rate_limited = 0u32;

        let reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            match source.fetch(cursor.as_ref()).await {
                Ok(page) => {
                    rate_limited = 0;
                    pages += 1;
                    let item_count = page.items.len();
                    aggregator.fold(page.items);
                    debug!(page = pages, items = item_count, "Folded page");

                    // Paced after every page, the last one included.
                    let paced =
                        self.config.page_pacing.is_zero() || self.pause(self.config.page_pacing).await;

                    if page.next_token.is_none() {
                        return Outcome::Complete {
                            data: aggregator.finish(),
                            pages,
                        };
                    }
                    if self.config.max_pages.is_some_and(|max| pages >= max) {
                        info!(pages, "Page limit reached; stopping pagination");
                        return Outcome::Complete {
                            data: aggregator.finish(),
                            pages,
                        };
                    }

                    if !paced {
                        break StopReason::Cancelled;
                    }
                    cursor = page.next_token;
                }
                Err(FetchFailure::RateLimited) => {
                    rate_limited += 1;
                    if rate_limited > self.config.max_rate_limit_retries {
                        warn!(
                            attempts = rate_limited - 1,
                            pages, "Rate-limit retry budget exhausted"
                        );
                        break StopReason::RetryBudgetExceeded {
                            attempts: rate_limited - 1,
                        };
                    }

                    let wait = self.config.cooldown_for(rate_limited);
                    warn!(
                        attempt = rate_limited,
                        wait_secs = wait.as_secs(),
                        pages,
                        "Rate limited; cooling down before retrying the same page"
                    );
                    if !self.pause(wait).await {
                        break StopReason::Cancelled;
                    }
                }
                Err(failure) => {
                    warn!(error = %failure, pages, "Stopping pagination early");
                    break StopReason::Fetch(failure);
                }
            }
        };

        Outcome::Partial(PartialResult {
            data: aggregator.finish(),
            pages,
            reason,
        })
    }

    /// Like [`Paginator::run`], applying the configured [`AbortPolicy`].
    pub async fn run_strict<A, S>(
        &self,
        scope: &str,
        source: &S,
        aggregator: A,
    ) -> Result<Outcome<A::Output>>
    where
        A: Aggregator + Send,
        S: PageSource<A::Item> + ?Sized,
    {
        let outcome = self.run(source, aggregator).await;
        match (self.config.abort_policy, outcome) {
            (AbortPolicy::Propagate, Outcome::Partial(partial)) => {
                Err(partial.reason.into_error(scope))
            }
            (_, outcome) => Ok(outcome),
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{ItemCollector, ThresholdCounter};
    use crate::twitter::{EngagementMetric, PublicMetrics, Tweet};
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses and records the cursor of every call.
    struct Scripted<T> {
        responses: Mutex<VecDeque<Result<Page<T>, FetchFailure>>>,
        cursors: Mutex<Vec<Option<String>>>,
    }

    impl<T> Scripted<T> {
        fn new(responses: Vec<Result<Page<T>, FetchFailure>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                cursors: Mutex::new(Vec::new()),
            }
        }

        fn cursors(&self) -> Vec<Option<String>> {
            self.cursors.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<T: Send> PageSource<T> for Scripted<T> {
        async fn fetch(&self, cursor: Option<&Cursor>) -> Result<Page<T>, FetchFailure> {
            self.cursors
                .lock()
                .unwrap()
                .push(cursor.map(|c| c.as_str().to_string()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("fetch called more often than scripted")
        }
    }

    /// Counts folds to verify the driver calls the aggregator once per page.
    #[derive(Default)]
    struct FoldCounter {
        folds: usize,
        items: usize,
    }

    impl Aggregator for FoldCounter {
        type Item = u32;
        type Output = (usize, usize);

        fn fold(&mut self, items: Vec<u32>) {
            self.folds += 1;
            self.items += items.len();
        }

        fn finish(self) -> (usize, usize) {
            (self.folds, self.items)
        }
    }

    fn page<T>(items: Vec<T>, next: Option<&str>) -> Result<Page<T>, FetchFailure> {
        Ok(Page::new(items, next.map(Cursor::new)))
    }

    fn tweet(id: &str, likes: u64) -> Tweet {
        Tweet {
            id: id.to_string(),
            text: String::new(),
            created_at: Utc::now(),
            author_id: "1".to_string(),
            public_metrics: PublicMetrics {
                like_count: likes,
                retweet_count: 0,
                reply_count: 0,
                quote_count: 0,
            },
            lang: None,
            conversation_id: None,
            in_reply_to_user_id: None,
            author: None,
        }
    }

    fn fast_config() -> PaginationConfig {
        PaginationConfig {
            page_pacing: Duration::ZERO,
            cooldown: Duration::from_secs(905),
            ..PaginationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_three_pages_then_done() {
        let source = Scripted::new(vec![
            page(vec![1, 2], Some("p2")),
            page(vec![3], Some("p3")),
            page(vec![4, 5, 6], None),
        ]);

        let outcome = Paginator::new(fast_config())
            .run(&source, FoldCounter::default())
            .await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.pages(), 3);
        assert_eq!(*outcome.data(), (3, 6));
        assert_eq!(
            source.cursors(),
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_empty_first_page_completes() {
        let source = Scripted::new(vec![page(Vec::<u32>::new(), None)]);
        let outcome = Paginator::new(fast_config())
            .run(&source, FoldCounter::default())
            .await;
        assert_eq!(outcome, Outcome::Complete { data: (1, 0), pages: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_same_cursor_without_double_counting() {
        let clean = Scripted::new(vec![
            page(vec![tweet("a", 60), tweet("b", 10)], Some("c1")),
            page(vec![tweet("c", 50)], None),
        ]);
        let throttled = Scripted::new(vec![
            page(vec![tweet("a", 60), tweet("b", 10)], Some("c1")),
            Err(FetchFailure::RateLimited),
            page(vec![tweet("c", 50)], None),
        ]);

        let paginator = Paginator::new(fast_config());
        let expected = paginator
            .run(&clean, ThresholdCounter::new(50, EngagementMetric::Likes))
            .await;

        let started = tokio::time::Instant::now();
        let outcome = paginator
            .run(&throttled, ThresholdCounter::new(50, EngagementMetric::Likes))
            .await;

        assert_eq!(outcome, expected);
        assert_eq!(outcome, Outcome::Complete { data: 2, pages: 2 });
        assert!(started.elapsed() >= Duration::from_secs(905));
        assert_eq!(
            throttled.cursors(),
            vec![None, Some("c1".to_string()), Some("c1".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exceeded_keeps_partial() {
        let source = Scripted::new(vec![
            page(vec![1, 2], Some("c1")),
            Err(FetchFailure::RateLimited),
            Err(FetchFailure::RateLimited),
            Err(FetchFailure::RateLimited),
        ]);
        let config = PaginationConfig {
            max_rate_limit_retries: 2,
            ..fast_config()
        };

        let outcome = Paginator::new(config)
            .run(&source, FoldCounter::default())
            .await;

        match outcome {
            Outcome::Partial(partial) => {
                assert_eq!(partial.data, (1, 2));
                assert_eq!(partial.pages, 1);
                assert_eq!(partial.reason, StopReason::RetryBudgetExceeded { attempts: 2 });
            }
            other => panic!("expected partial outcome, got {other:?}"),
        }
        assert_eq!(source.cursors().len(), 4);
    }

    #[tokio::test]
    async fn test_remote_error_returns_partial() {
        let source = Scripted::new(vec![
            page(vec![tweet("a", 1), tweet("b", 2)], Some("c1")),
            Err(FetchFailure::Remote {
                status: 503,
                body: "unavailable".to_string(),
            }),
        ]);

        let outcome = Paginator::new(fast_config())
            .run(&source, ItemCollector::new())
            .await;

        assert!(!outcome.is_complete());
        assert_eq!(outcome.data().len(), 2);
        assert!(matches!(
            outcome.stop_reason(),
            Some(StopReason::Fetch(FetchFailure::Remote { status: 503, .. }))
        ));
    }

    #[tokio::test]
    async fn test_propagate_policy_turns_stop_into_error() {
        let source = Scripted::new(vec![Err::<Page<u32>, _>(FetchFailure::Transport(
            "connection reset".to_string(),
        ))]);
        let config = PaginationConfig {
            abort_policy: AbortPolicy::Propagate,
            ..fast_config()
        };

        let err = Paginator::new(config)
            .run_strict("Jara", &source, FoldCounter::default())
            .await
            .unwrap_err();

        match err {
            HarvestError::Fetch { scope, source } => {
                assert_eq!(scope, "Jara");
                assert!(matches!(source, FetchFailure::Transport(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_pages_stops_early_as_complete() {
        let source = Scripted::new(vec![page(vec![1], Some("c1")), page(vec![2], Some("c2"))]);
        let config = PaginationConfig {
            max_pages: Some(2),
            ..fast_config()
        };

        let outcome = Paginator::new(config)
            .run(&source, FoldCounter::default())
            .await;
        assert_eq!(outcome, Outcome::Complete { data: (2, 2), pages: 2 });
    }

    #[tokio::test]
    async fn test_cancelled_before_first_fetch() {
        let source = Scripted::new(Vec::<Result<Page<u32>, FetchFailure>>::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = Paginator::new(fast_config())
            .with_cancellation(cancel)
            .run(&source, FoldCounter::default())
            .await;

        assert_eq!(outcome.stop_reason(), Some(&StopReason::Cancelled));
        assert!(source.cursors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_cooldown() {
        let source = Scripted::new(vec![
            page(vec![7], Some("c1")),
            Err(FetchFailure::RateLimited),
        ]);
        let cancel = CancellationToken::new();
        let paginator = Paginator::new(fast_config()).with_cancellation(cancel.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            cancel.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome = paginator.run(&source, FoldCounter::default()).await;
        trigger.await.unwrap();

        assert_eq!(outcome.stop_reason(), Some(&StopReason::Cancelled));
        assert_eq!(*outcome.data(), (1, 1));
        assert!(started.elapsed() < Duration::from_secs(905));
    }

    #[test]
    fn test_cooldown_backoff() {
        let config = PaginationConfig {
            cooldown: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_cooldown: Duration::from_secs(200),
            ..PaginationConfig::default()
        };

        assert_eq!(config.cooldown_for(0), Duration::ZERO);
        assert_eq!(config.cooldown_for(1), Duration::from_secs(60));
        assert_eq!(config.cooldown_for(2), Duration::from_secs(120));
        // Capped
        assert_eq!(config.cooldown_for(3), Duration::from_secs(200));

        let fixed = PaginationConfig::default();
        assert_eq!(fixed.cooldown_for(1), DEFAULT_COOLDOWN);
        assert_eq!(fixed.cooldown_for(3), DEFAULT_COOLDOWN);
    }

    #[test]
    fn test_cooldown_longer_than_cap_is_not_shortened() {
        let config = PaginationConfig {
            cooldown: Duration::from_secs(5000),
            ..PaginationConfig::default()
        };

        assert_eq!(config.cooldown_for(1), Duration::from_secs(5000));
        assert_eq!(config.cooldown_for(4), Duration::from_secs(5000));

        let growing = PaginationConfig {
            cooldown: Duration::from_secs(5000),
            backoff_multiplier: 2.0,
            ..PaginationConfig::default()
        };
        assert_eq!(growing.cooldown_for(2), Duration::from_secs(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_page_is_paced() {
        let source = Scripted::new(vec![page(vec![1], None)]);
        let config = PaginationConfig {
            page_pacing: Duration::from_secs(5),
            ..fast_config()
        };

        let started = tokio::time::Instant::now();
        let outcome = Paginator::new(config)
            .run(&source, FoldCounter::default())
            .await;

        assert_eq!(outcome, Outcome::Complete { data: (1, 1), pages: 1 });
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pacing_stops_before_next_page() {
        let source = Scripted::new(vec![page(vec![1], Some("c1"))]);
        let cancel = CancellationToken::new();
        let config = PaginationConfig {
            page_pacing: Duration::from_secs(30),
            ..fast_config()
        };
        let paginator = Paginator::new(config).with_cancellation(cancel.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let outcome = paginator.run(&source, FoldCounter::default()).await;
        trigger.await.unwrap();

        assert_eq!(outcome.stop_reason(), Some(&StopReason::Cancelled));
        assert_eq!(*outcome.data(), (1, 1));
        assert_eq!(source.cursors().len(), 1);
    }
}
