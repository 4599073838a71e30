use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use thiserror::Error;

use crate::models::activity::{ActivityRecord, CommitRecord, IssueRecord, PullRequestRecord, ReviewRecord};
use crate::models::event::{EventPayload, IssuesPayload, PullRequestPayload, PushPayload, RawEvent, ReviewPayload};
use crate::services::git_platforms::{parse_repo_name, EventSource, PullRequestDetail};
use crate::services::pagination::{EventPages, RetryPolicy};

/// Errors that abort a whole fetch. Everything else is recovered per event.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("failed to fetch events page {page} for {username}: {source:#}")]
    SourceUnavailable {
        username: String,
        page: u32,
        source: anyhow::Error,
    },

    #[error("fetching activity for {username} exceeded the {timeout:?} deadline")]
    DeadlineExceeded { username: String, timeout: Duration },

    #[error("invalid time window: since {since} is after until {until}")]
    InvalidWindow {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },
}

/// Why a single event or commit was left out of the record
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
    MalformedEvent,
    IncompleteCommit,
    UnparseableRepository,
    UnverifiedAuthor,
    DetailLookupFailed,
    ForeignReview,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SkipReason::MalformedEvent => "malformed_event",
            SkipReason::IncompleteCommit => "incomplete_commit",
            SkipReason::UnparseableRepository => "unparseable_repository",
            SkipReason::UnverifiedAuthor => "unverified_author",
            SkipReason::DetailLookupFailed => "detail_lookup_failed",
            SkipReason::ForeignReview => "foreign_review",
        };
        f.write_str(name)
    }
}

/// Per-fetch counters of everything that was filtered or recovered
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SkipTally {
    pub pages: u32,
    pub events_seen: usize,
    pub outside_window: usize,
    pub duplicates: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl SkipTally {
    pub fn count(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }
}

/// Receives structured notifications from an aggregation pass.
///
/// The engine never logs directly; everything goes through this trait so
/// callers decide where diagnostics end up.
pub trait AggregationObserver: Send + Sync {
    fn page_fetched(&self, _username: &str, _page: u32, _events: usize) {}

    /// A page request failed and will be retried after `delay`
    fn page_retry(&self, _username: &str, _page: u32, _attempt: u32, _delay: Duration, _error: &anyhow::Error) {}

    /// The source pointed back at a page already fetched; the walk stops
    fn cursor_stalled(&self, _username: &str, _page: u32, _next: u32) {}

    fn skipped(&self, _username: &str, _reason: SkipReason, _detail: &str) {}

    fn finished(&self, _record: &ActivityRecord, _tally: &SkipTally) {}
}

/// Default observer writing through the `log` facade
pub struct LogObserver;

impl AggregationObserver for LogObserver {
    fn page_fetched(&self, username: &str, page: u32, events: usize) {
        log::info!("📥 [{}] fetched {} events (page {})", username, events, page);
    }

    fn page_retry(&self, username: &str, page: u32, attempt: u32, delay: Duration, error: &anyhow::Error) {
        log::warn!(
            "⚠️  [{}] events page {} failed (attempt {}), retrying in {:?}: {:#}",
            username,
            page,
            attempt,
            delay,
            error
        );
    }

    fn cursor_stalled(&self, username: &str, page: u32, next: u32) {
        log::warn!(
            "⚠️  [{}] source reported non-advancing cursor {} after page {}, stopping",
            username,
            next,
            page
        );
    }

    fn skipped(&self, username: &str, reason: SkipReason, detail: &str) {
        match reason {
            SkipReason::MalformedEvent | SkipReason::DetailLookupFailed => {
                log::warn!("⚠️  [{}] {}: {}", username, reason, detail)
            }
            _ => log::debug!("[{}] {}: {}", username, reason, detail),
        }
    }

    fn finished(&self, record: &ActivityRecord, tally: &SkipTally) {
        let stats = record.statistics();
        log::info!(
            "📊 [{}] {} pages, {} events ({} outside window, {} duplicates): {} commits, {} PRs, {} issues, {} reviews",
            record.username(),
            tally.pages,
            tally.events_seen,
            tally.outside_window,
            tally.duplicates,
            stats.total_commits,
            stats.total_prs,
            stats.total_issues,
            stats.total_reviews
        );

        let lookup_failures = tally.count(SkipReason::DetailLookupFailed);
        if lookup_failures > 0 {
            log::warn!(
                "⚠️  [{}] {} detail lookups failed; counts may be understated",
                record.username(),
                lookup_failures
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct FetchOptions {
    pub per_page: u32,
    /// Upper bound on concurrent detail lookups within one page
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Deadline for the whole fetch
    pub timeout: Option<Duration>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            per_page: 100,
            concurrency: 8,
            retry: RetryPolicy::default(),
            timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Replays a user's event timeline into an `ActivityRecord`
pub struct ActivityAggregationService {
    source: Arc<dyn EventSource>,
    observer: Arc<dyn AggregationObserver>,
    options: FetchOptions,
}

impl ActivityAggregationService {
    pub fn new(source: Arc<dyn EventSource>, options: FetchOptions) -> Self {
        Self {
            source,
            observer: Arc::new(LogObserver),
            options,
        }
    }

    #[cfg(test)]
    pub fn with_observer(mut self, observer: Arc<dyn AggregationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Collect all commits, pull requests, issues and reviews of `username`
    /// whose timeline events fall in `[since, until]`.
    ///
    /// Either the complete record is returned or a single error; a fetch
    /// interrupted by a page failure or the deadline never yields a partial
    /// record.
    pub async fn fetch_activities(
        &self,
        username: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ActivityRecord, AggregationError> {
        let record = ActivityRecord::new(username, since, until)
            .ok_or(AggregationError::InvalidWindow { since, until })?;

        let pass = AggregationPass::new(self, record).run();

        match self.options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, pass).await.map_err(|_| {
                AggregationError::DeadlineExceeded {
                    username: username.to_string(),
                    timeout,
                }
            })?,
            None => pass.await,
        }
    }
}

/// A push commit waiting for authorship verification
struct PendingCommit {
    owner: String,
    repo: String,
    record: CommitRecord,
}

/// A first-seen pull request waiting for its size lookup
struct PendingPullRequest {
    repo_path: Option<(String, String)>,
    record: PullRequestRecord,
}

/// State of one fetch: the record being built plus the dedup sets
struct AggregationPass<'a> {
    service: &'a ActivityAggregationService,
    record: ActivityRecord,
    seen_commits: HashSet<String>,
    seen_pull_requests: HashSet<String>,
    seen_issues: HashSet<String>,
    tally: SkipTally,
}

fn item_key(repository: &str, number: i64) -> String {
    format!("{}#{}", repository, number)
}

impl<'a> AggregationPass<'a> {
    fn new(service: &'a ActivityAggregationService, record: ActivityRecord) -> Self {
        Self {
            service,
            record,
            seen_commits: HashSet::new(),
            seen_pull_requests: HashSet::new(),
            seen_issues: HashSet::new(),
            tally: SkipTally::default(),
        }
    }

    async fn run(mut self) -> Result<ActivityRecord, AggregationError> {
        let service = self.service;
        let username = self.record.username().to_string();
        let mut pages = EventPages::new(
            service.source.as_ref(),
            service.observer.as_ref(),
            &username,
            service.options.per_page,
            service.options.retry,
        );

        // Pages must be handled in source order: first-seen-wins dedup
        // relies on the newest-first ordering of the timeline.
        while let Some((page, events)) = pages.next_page().await? {
            self.tally.pages += 1;
            service.observer.page_fetched(&username, page, events.len());
            self.process_page(events).await;
        }

        service.observer.finished(&self.record, &self.tally);
        Ok(self.record)
    }

    fn skip(&mut self, reason: SkipReason, detail: &str) {
        *self.tally.skipped.entry(reason).or_insert(0) += 1;
        self.service
            .observer
            .skipped(self.record.username(), reason, detail);
    }

    async fn process_page(&mut self, events: Vec<RawEvent>) {
        let mut commits = Vec::new();
        let mut pull_requests = Vec::new();

        for event in events {
            self.tally.events_seen += 1;

            let Some(timestamp) = event.timestamp() else {
                self.skip(
                    SkipReason::MalformedEvent,
                    &format!("{} event without a valid timestamp", event.kind),
                );
                continue;
            };

            if !self.record.contains(timestamp) {
                self.tally.outside_window += 1;
                continue;
            }

            let payload = match event.decode_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    self.skip(
                        SkipReason::MalformedEvent,
                        &format!("{} in {}: {}", event.kind, event.repo.name, e),
                    );
                    continue;
                }
            };

            let repository = event.repo.name.as_str();
            match payload {
                EventPayload::Push(push) => self.collect_commits(repository, timestamp, push, &mut commits),
                EventPayload::PullRequest(pr) => {
                    if let Some(pending) = self.classify_pull_request(repository, timestamp, pr) {
                        pull_requests.push(pending);
                    }
                }
                EventPayload::Issues(issue) => self.record_issue(repository, timestamp, issue),
                EventPayload::Review(review) => self.record_review(repository, timestamp, review),
                EventPayload::Other => {}
            }
        }

        self.verify_commits(commits).await;
        self.resolve_pull_requests(pull_requests).await;
    }

    fn collect_commits(
        &mut self,
        repository: &str,
        timestamp: DateTime<Utc>,
        push: PushPayload,
        pending: &mut Vec<PendingCommit>,
    ) {
        for commit in push.commits {
            let (sha, message) = match (commit.sha, commit.message) {
                (Some(sha), Some(message)) if !sha.is_empty() && !message.is_empty() => (sha, message),
                _ => {
                    self.skip(SkipReason::IncompleteCommit, &format!("commit in {} without sha or message", repository));
                    continue;
                }
            };

            let Some((owner, repo)) = parse_repo_name(repository) else {
                self.skip(SkipReason::UnparseableRepository, &format!("{} (commit {})", repository, sha));
                continue;
            };

            // The same commit can show up in several pushes (e.g. branch then merge)
            if !self.seen_commits.insert(sha.clone()) {
                self.tally.duplicates += 1;
                continue;
            }

            pending.push(PendingCommit {
                owner: owner.to_string(),
                repo: repo.to_string(),
                record: CommitRecord {
                    sha,
                    message,
                    repository: repository.to_string(),
                    url: commit.url.unwrap_or_default(),
                    author: commit.author.and_then(|a| a.name).unwrap_or_default(),
                    date: timestamp,
                    additions: 0,
                    deletions: 0,
                },
            });
        }
    }

    fn classify_pull_request(
        &mut self,
        repository: &str,
        timestamp: DateTime<Utc>,
        payload: PullRequestPayload,
    ) -> Option<PendingPullRequest> {
        let pr = payload.pull_request;

        if !self.seen_pull_requests.insert(item_key(repository, pr.number)) {
            self.tally.duplicates += 1;
            return None;
        }

        let repo_path = match parse_repo_name(repository) {
            Some((owner, repo)) => Some((owner.to_string(), repo.to_string())),
            None => {
                self.skip(
                    SkipReason::UnparseableRepository,
                    &format!("{} (pull request #{})", repository, pr.number),
                );
                None
            }
        };

        Some(PendingPullRequest {
            repo_path,
            record: PullRequestRecord {
                number: pr.number,
                title: pr.title.unwrap_or_default(),
                repository: repository.to_string(),
                url: pr.html_url.unwrap_or_default(),
                state: pr.state.unwrap_or_default(),
                created_at: pr.created_at.unwrap_or(timestamp),
                merged_at: pr.merged_at,
                additions: 0,
                deletions: 0,
                comments: pr.comments.unwrap_or(0),
                observed_at: timestamp,
            },
        })
    }

    fn record_issue(&mut self, repository: &str, timestamp: DateTime<Utc>, payload: IssuesPayload) {
        let issue = payload.issue;

        // Pull requests are recorded through their own events only
        if issue.pull_request.is_some() {
            return;
        }

        if !self.seen_issues.insert(item_key(repository, issue.number)) {
            self.tally.duplicates += 1;
            return;
        }

        self.record.issues.push(IssueRecord {
            number: issue.number,
            title: issue.title.unwrap_or_default(),
            repository: repository.to_string(),
            url: issue.html_url.unwrap_or_default(),
            state: issue.state.unwrap_or_default(),
            created_at: issue.created_at.unwrap_or(timestamp),
            closed_at: issue.closed_at,
            comments: issue.comments.unwrap_or(0),
            observed_at: timestamp,
        });
    }

    fn record_review(&mut self, repository: &str, timestamp: DateTime<Utc>, payload: ReviewPayload) {
        let reviewer = payload.review.user.as_ref().and_then(|u| u.login.as_deref());
        if reviewer != Some(self.record.username()) {
            let detail = format!(
                "review on {}#{} by {}",
                repository,
                payload.pull_request.number,
                reviewer.unwrap_or("<unknown>")
            );
            self.skip(SkipReason::ForeignReview, &detail);
            return;
        }

        self.record.reviews.push(ReviewRecord {
            pr_number: payload.pull_request.number,
            pr_title: payload.pull_request.title.unwrap_or_default(),
            repository: repository.to_string(),
            url: payload.review.html_url.unwrap_or_default(),
            state: payload.review.state.unwrap_or_default(),
            created_at: timestamp,
        });
    }

    /// Look up every pending commit (bounded, order-preserving) and keep
    /// those whose verified author or committer is the target user.
    async fn verify_commits(&mut self, pending: Vec<PendingCommit>) {
        if pending.is_empty() {
            return;
        }

        let service = self.service;
        let source = service.source.as_ref();
        let lookups: Vec<_> = stream::iter(pending)
            .map(|commit| async move {
                let detail = source
                    .get_commit_detail(&commit.owner, &commit.repo, &commit.record.sha)
                    .await;
                (commit, detail)
            })
            .buffered(service.options.concurrency.max(1))
            .collect()
            .await;

        for (commit, detail) in lookups {
            let mut record = commit.record;

            let detail = match detail {
                Ok(detail) => detail,
                Err(e) => {
                    self.skip(
                        SkipReason::DetailLookupFailed,
                        &format!("commit {} in {}: {:#}", record.sha, record.repository, e),
                    );
                    continue;
                }
            };

            let username = self.record.username();
            let authored = detail.author_login.as_deref() == Some(username)
                || detail.committer_login.as_deref() == Some(username);

            if !authored {
                let detail = format!(
                    "commit {} in {} by {}",
                    record.sha,
                    record.repository,
                    detail.author_login.as_deref().unwrap_or("<unknown>")
                );
                self.skip(SkipReason::UnverifiedAuthor, &detail);
                continue;
            }

            record.additions = detail.additions;
            record.deletions = detail.deletions;
            self.record.commits.push(record);
        }
    }

    /// Fill in line counts for first-seen pull requests. A failed lookup
    /// keeps the pull request with zero counts.
    async fn resolve_pull_requests(&mut self, pending: Vec<PendingPullRequest>) {
        if pending.is_empty() {
            return;
        }

        let service = self.service;
        let source = service.source.as_ref();
        let lookups: Vec<_> = stream::iter(pending)
            .map(|pr| async move {
                let detail = match &pr.repo_path {
                    Some((owner, repo)) => Some(
                        source
                            .get_pull_request_detail(owner, repo, pr.record.number)
                            .await,
                    ),
                    None => None,
                };
                (pr, detail)
            })
            .buffered(service.options.concurrency.max(1))
            .collect()
            .await;

        for (pr, detail) in lookups {
            let mut record = pr.record;

            match detail {
                Some(Ok(PullRequestDetail {
                    additions,
                    deletions,
                    merged_at,
                })) => {
                    record.additions = additions;
                    record.deletions = deletions;
                    // The payload's own merge time wins; the lookup only fills a gap
                    if record.merged_at.is_none() {
                        record.merged_at = merged_at;
                    }
                }
                Some(Err(e)) => {
                    self.skip(
                        SkipReason::DetailLookupFailed,
                        &format!("pull request {}#{}: {:#}", record.repository, record.number, e),
                    );
                }
                None => {}
            }

            self.record.pull_requests.push(record);
        }
    }
}
