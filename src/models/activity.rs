use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// All activity collected for one user over one time window
#[derive(Clone, Debug, Serialize)]
pub struct ActivityRecord {
    username: String,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    pub commits: Vec<CommitRecord>,
    pub pull_requests: Vec<PullRequestRecord>,
    pub issues: Vec<IssueRecord>,
    pub reviews: Vec<ReviewRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommitRecord {
    /// Always the full SHA; shortening is left to formatters
    pub sha: String,
    pub message: String,
    pub repository: String,
    pub url: String,
    pub author: String,
    pub date: DateTime<Utc>,
    pub additions: i64,
    pub deletions: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PullRequestRecord {
    pub number: i64,
    pub title: String,
    pub repository: String,
    pub url: String,
    /// Platform-reported state ("open", "closed", ...)
    pub state: String,
    pub created_at: DateTime<Utc>,
    /// None means not merged (yet)
    pub merged_at: Option<DateTime<Utc>>,
    pub additions: i64,
    pub deletions: i64,
    pub comments: i64,
    /// Timestamp of the timeline event this record came from
    pub observed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IssueRecord {
    pub number: i64,
    pub title: String,
    pub repository: String,
    pub url: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    /// None means still open
    pub closed_at: Option<DateTime<Utc>>,
    pub comments: i64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReviewRecord {
    pub pr_number: i64,
    pub pr_title: String,
    pub repository: String,
    pub url: String,
    /// APPROVED, CHANGES_REQUESTED, COMMENTED, ... as reported by the platform
    pub state: String,
    pub created_at: DateTime<Utc>,
}

/// Derived counters, recomputed from the record on every call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_commits: i64,
    pub total_prs: i64,
    pub merged_prs: i64,
    pub total_issues: i64,
    pub closed_issues: i64,
    pub total_reviews: i64,
    pub code_additions: i64,
    pub code_deletions: i64,
    pub net_code_changes: i64,
}

impl ActivityRecord {
    /// Create an empty record. Returns None when `since` is after `until`.
    pub fn new(username: &str, since: DateTime<Utc>, until: DateTime<Utc>) -> Option<Self> {
        if since > until {
            return None;
        }

        Some(Self {
            username: username.to_string(),
            since,
            until,
            commits: Vec::new(),
            pull_requests: Vec::new(),
            issues: Vec::new(),
            reviews: Vec::new(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    pub fn until(&self) -> DateTime<Utc> {
        self.until
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.since <= timestamp && timestamp <= self.until
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
            && self.pull_requests.is_empty()
            && self.issues.is_empty()
            && self.reviews.is_empty()
    }

    pub fn statistics(&self) -> Statistics {
        let (mut additions, mut deletions) = (0i64, 0i64);

        for commit in &self.commits {
            additions += commit.additions;
            deletions += commit.deletions;
        }

        for pr in &self.pull_requests {
            additions += pr.additions;
            deletions += pr.deletions;
        }

        Statistics {
            total_commits: self.commits.len() as i64,
            total_prs: self.pull_requests.len() as i64,
            merged_prs: self
                .pull_requests
                .iter()
                .filter(|pr| pr.merged_at.is_some())
                .count() as i64,
            total_issues: self.issues.len() as i64,
            closed_issues: self
                .issues
                .iter()
                .filter(|issue| issue.closed_at.is_some())
                .count() as i64,
            total_reviews: self.reviews.len() as i64,
            code_additions: additions,
            code_deletions: deletions,
            net_code_changes: additions - deletions,
        }
    }
}

impl Statistics {
    /// String-keyed view used by report payloads
    pub fn to_map(&self) -> BTreeMap<&'static str, i64> {
        BTreeMap::from([
            ("total_commits", self.total_commits),
            ("total_prs", self.total_prs),
            ("merged_prs", self.merged_prs),
            ("total_issues", self.total_issues),
            ("closed_issues", self.closed_issues),
            ("total_reviews", self.total_reviews),
            ("code_additions", self.code_additions),
            ("code_deletions", self.code_deletions),
            ("net_code_changes", self.net_code_changes),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn commit(sha: &str, additions: i64, deletions: i64) -> CommitRecord {
        CommitRecord {
            sha: sha.to_string(),
            message: "msg".to_string(),
            repository: "octo/repo".to_string(),
            url: String::new(),
            author: "Octo Cat".to_string(),
            date: ts(2),
            additions,
            deletions,
        }
    }

    #[test]
    fn test_new_rejects_inverted_window() {
        assert!(ActivityRecord::new("octocat", ts(5), ts(1)).is_none());
        assert!(ActivityRecord::new("octocat", ts(1), ts(1)).is_some());
    }

    #[test]
    fn test_contains_is_inclusive() {
        let record = ActivityRecord::new("octocat", ts(1), ts(7)).unwrap();
        assert!(record.contains(ts(1)));
        assert!(record.contains(ts(7)));
        assert!(!record.contains(ts(8)));
    }

    #[test]
    fn test_statistics_sum_commits_and_pull_requests() {
        let mut record = ActivityRecord::new("octocat", ts(1), ts(7)).unwrap();
        record.commits.push(commit("a", 10, 2));
        record.commits.push(commit("b", 5, 5));
        record.pull_requests.push(PullRequestRecord {
            number: 1,
            title: "Add things".to_string(),
            repository: "octo/repo".to_string(),
            url: String::new(),
            state: "closed".to_string(),
            created_at: ts(2),
            merged_at: Some(ts(3)),
            additions: 100,
            deletions: 40,
            comments: 3,
            observed_at: ts(3),
        });
        record.issues.push(IssueRecord {
            number: 2,
            title: "Bug".to_string(),
            repository: "octo/repo".to_string(),
            url: String::new(),
            state: "open".to_string(),
            created_at: ts(2),
            closed_at: None,
            comments: 0,
            observed_at: ts(2),
        });

        let stats = record.statistics();
        assert_eq!(stats.total_commits, 2);
        assert_eq!(stats.total_prs, 1);
        assert_eq!(stats.merged_prs, 1);
        assert_eq!(stats.total_issues, 1);
        assert_eq!(stats.closed_issues, 0);
        assert_eq!(stats.code_additions, 115);
        assert_eq!(stats.code_deletions, 47);
        assert_eq!(stats.net_code_changes, 68);

        // Recomputing gives the same answer
        assert_eq!(record.statistics(), stats);
        assert_eq!(stats.to_map()["net_code_changes"], 68);
    }

    #[test]
    fn test_empty_record_statistics() {
        let record = ActivityRecord::new("octocat", ts(1), ts(7)).unwrap();
        assert!(record.is_empty());
        assert_eq!(record.statistics(), Statistics::default());
        assert_eq!(record.statistics().to_map().len(), 9);
    }
}
