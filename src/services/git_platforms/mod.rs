pub mod github;

pub use github::GitHubClient;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::event::RawEvent;

/// One page of the timeline together with the cursor of the following page
#[derive(Clone, Debug, Default)]
pub struct EventPage {
    pub events: Vec<RawEvent>,
    /// None when this is the last page
    pub next_page: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page cursor
    pub page: u32,
    pub per_page: u32,
}

/// Platform-verified identity and size of a single commit
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitDetail {
    pub author_login: Option<String>,
    pub committer_login: Option<String>,
    pub additions: i64,
    pub deletions: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRequestDetail {
    pub additions: i64,
    pub deletions: i64,
    pub merged_at: Option<DateTime<Utc>>,
}

/// Configuration for a platform instance
#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub platform: String,
    pub api_base_url: String,
}

impl PlatformConfig {
    /// Create a GitHub.com configuration
    pub fn github() -> Self {
        Self {
            platform: "github".to_string(),
            api_base_url: "https://api.github.com".to_string(),
        }
    }

    /// GitHub configuration with a custom API root (GitHub Enterprise, test servers)
    pub fn github_with_api(api_base_url: &str) -> Self {
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            ..Self::github()
        }
    }
}

/// The three operations the aggregation engine needs from a hosting platform
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch one page of the public events performed by `username`
    async fn list_events(&self, username: &str, request: PageRequest) -> Result<EventPage>;

    /// Look up the verified author/committer and line counts of a commit
    async fn get_commit_detail(&self, owner: &str, repo: &str, sha: &str) -> Result<CommitDetail>;

    /// Look up line counts and merge time of a pull request
    async fn get_pull_request_detail(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PullRequestDetail>;
}

/// Split "owner/repo" into its two halves
pub fn parse_repo_name(full_name: &str) -> Option<(&str, &str)> {
    let (owner, repo) = full_name.split_once('/')?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner, repo))
}
