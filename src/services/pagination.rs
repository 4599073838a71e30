use std::time::Duration;

use crate::models::event::RawEvent;
use crate::services::activity_aggregation::{AggregationError, AggregationObserver};
use crate::services::git_platforms::{EventSource, PageRequest};

/// Bounded retry with exponential backoff for page requests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Walks a user's event timeline one page at a time, in source order.
///
/// The cursor starts at page 1 and follows whatever the source reports as
/// the next page; the walk ends as soon as the source reports none.
pub struct EventPages<'a> {
    source: &'a dyn EventSource,
    observer: &'a dyn AggregationObserver,
    username: &'a str,
    per_page: u32,
    retry: RetryPolicy,
    next: Option<u32>,
    requests: u32,
}

impl<'a> EventPages<'a> {
    pub fn new(
        source: &'a dyn EventSource,
        observer: &'a dyn AggregationObserver,
        username: &'a str,
        per_page: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            observer,
            username,
            per_page: per_page.max(1),
            retry,
            next: Some(1),
            requests: 0,
        }
    }

    /// Number of `list_events` calls issued so far, retries included
    #[cfg(test)]
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Fetch the next page. Returns `Ok(None)` once the timeline is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<(u32, Vec<RawEvent>)>, AggregationError> {
        let Some(page) = self.next else {
            return Ok(None);
        };

        let request = PageRequest {
            page,
            per_page: self.per_page,
        };

        let mut attempt = 0;
        let result = loop {
            self.requests += 1;
            match self.source.list_events(self.username, request).await {
                Ok(result) => break result,
                Err(e) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    self.observer.page_retry(self.username, page, attempt, delay, &e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.next = None;
                    return Err(AggregationError::SourceUnavailable {
                        username: self.username.to_string(),
                        page,
                        source: e,
                    });
                }
            }
        };

        self.next = match result.next_page {
            Some(next) if next > page => Some(next),
            Some(next) => {
                self.observer.cursor_stalled(self.username, page, next);
                None
            }
            None => None,
        };

        Ok(Some((page, result.events)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::git_platforms::{CommitDetail, EventPage, PullRequestDetail};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Quiet;

    impl AggregationObserver for Quiet {}

    #[derive(Default)]
    struct RetryLog {
        retries: Mutex<Vec<(u32, u32, Duration)>>,
        stalls: Mutex<Vec<(u32, u32)>>,
    }

    impl AggregationObserver for RetryLog {
        fn page_retry(&self, _username: &str, page: u32, attempt: u32, delay: Duration, _error: &anyhow::Error) {
            self.retries.lock().unwrap().push((page, attempt, delay));
        }

        fn cursor_stalled(&self, _username: &str, page: u32, next: u32) {
            self.stalls.lock().unwrap().push((page, next));
        }
    }

    /// Serves `total` empty pages; page N fails `failures[N]` times first
    struct CountingSource {
        total: u32,
        failures: Mutex<Vec<(u32, u32)>>,
        cursor_override: Option<u32>,
        seen: Mutex<Vec<PageRequest>>,
    }

    impl CountingSource {
        fn new(total: u32) -> Self {
            Self {
                total,
                failures: Mutex::new(Vec::new()),
                cursor_override: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(total: u32, page: u32, times: u32) -> Self {
            let source = Self::new(total);
            source.failures.lock().unwrap().push((page, times));
            source
        }
    }

    #[async_trait]
    impl EventSource for CountingSource {
        async fn list_events(&self, _username: &str, request: PageRequest) -> Result<EventPage> {
            self.seen.lock().unwrap().push(request);

            let mut failures = self.failures.lock().unwrap();
            if let Some(entry) = failures.iter_mut().find(|(p, n)| *p == request.page && *n > 0) {
                entry.1 -= 1;
                return Err(anyhow!("boom on page {}", request.page));
            }

            let next_page = match self.cursor_override {
                Some(cursor) => Some(cursor),
                None if request.page < self.total => Some(request.page + 1),
                None => None,
            };

            Ok(EventPage {
                events: Vec::new(),
                next_page,
            })
        }

        async fn get_commit_detail(&self, _: &str, _: &str, _: &str) -> Result<CommitDetail> {
            unreachable!("not used by the pagination driver")
        }

        async fn get_pull_request_detail(&self, _: &str, _: &str, _: i64) -> Result<PullRequestDetail> {
            unreachable!("not used by the pagination driver")
        }
    }

    async fn drain(pages: &mut EventPages<'_>) -> Result<Vec<u32>, AggregationError> {
        let mut seen = Vec::new();
        while let Some((page, _)) = pages.next_page().await? {
            seen.push(page);
        }
        Ok(seen)
    }

    #[tokio::test]
    async fn test_issues_exactly_one_request_per_page() {
        for total in 1..=4 {
            let source = CountingSource::new(total);
            let mut pages = EventPages::new(&source, &Quiet, "octocat", 50, RetryPolicy::none());

            let seen = drain(&mut pages).await.unwrap();

            assert_eq!(seen, (1..=total).collect::<Vec<_>>());
            assert_eq!(pages.requests(), total);
            assert!(source.seen.lock().unwrap().iter().all(|r| r.per_page == 50));
        }
    }

    #[tokio::test]
    async fn test_exhausted_driver_stays_exhausted() {
        let source = CountingSource::new(1);
        let mut pages = EventPages::new(&source, &Quiet, "octocat", 100, RetryPolicy::none());

        assert!(pages.next_page().await.unwrap().is_some());
        assert!(pages.next_page().await.unwrap().is_none());
        assert!(pages.next_page().await.unwrap().is_none());
        assert_eq!(pages.requests(), 1);
    }

    #[tokio::test]
    async fn test_page_failure_is_source_unavailable() {
        let source = CountingSource::failing(3, 2, u32::MAX);
        let mut pages = EventPages::new(&source, &Quiet, "octocat", 100, RetryPolicy::none());

        let err = drain(&mut pages).await.unwrap_err();
        match err {
            AggregationError::SourceUnavailable { username, page, source } => {
                assert_eq!(username, "octocat");
                assert_eq!(page, 2);
                assert!(source.to_string().contains("boom on page 2"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let source = CountingSource::failing(2, 1, 2);
        let retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let log = RetryLog::default();
        let mut pages = EventPages::new(&source, &log, "octocat", 100, retry);

        assert_eq!(drain(&mut pages).await.unwrap(), vec![1, 2]);
        assert_eq!(pages.requests(), 4);
        assert_eq!(
            *log.retries.lock().unwrap(),
            vec![(1, 1, Duration::from_millis(1)), (1, 2, Duration::from_millis(2))]
        );
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let source = CountingSource::failing(2, 1, 5);
        let retry = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
        };
        let mut pages = EventPages::new(&source, &Quiet, "octocat", 100, retry);

        assert!(drain(&mut pages).await.is_err());
        assert_eq!(pages.requests(), 2);
    }

    #[tokio::test]
    async fn test_non_advancing_cursor_stops() {
        let mut source = CountingSource::new(5);
        source.cursor_override = Some(1);
        let log = RetryLog::default();
        let mut pages = EventPages::new(&source, &log, "octocat", 100, RetryPolicy::none());

        assert_eq!(drain(&mut pages).await.unwrap(), vec![1]);
        assert_eq!(*log.stalls.lock().unwrap(), vec![(1, 1)]);
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
    }
}
