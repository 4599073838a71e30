use super::{CommitDetail, EventPage, EventSource, PageRequest, PlatformConfig, PullRequestDetail};
use crate::models::event::RawEvent;
use crate::utils::http_client::create_http_client;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, LINK};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

pub struct GitHubClient {
    http: Client,
    config: PlatformConfig,
    token: String,
}

impl GitHubClient {
    pub fn new(config: PlatformConfig, token: &str) -> Result<Self> {
        Ok(Self {
            http: create_http_client()?,
            config,
            token: token.to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(T, HeaderMap)> {
        let response = self
            .http
            .get(format!("{}{}", self.config.api_base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .query(query)
            .send()
            .await
            .with_context(|| format!("{} request to {} failed", self.config.platform, path))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "{} API request to {} failed with status {}: {}",
                self.config.platform,
                path,
                status,
                error_text
            ));
        }

        let headers = response.headers().clone();
        let body = response
            .json::<T>()
            .await
            .with_context(|| format!("Invalid GitHub response for {}", path))?;

        Ok((body, headers))
    }

    /// Authenticated user's login, used to check a token on startup
    pub async fn authenticated_login(&self) -> Result<String> {
        let (user, _) = self.get_json::<GitHubUser>("/user", &[]).await?;
        Ok(user.login)
    }
}

#[async_trait]
impl EventSource for GitHubClient {
    async fn list_events(&self, username: &str, request: PageRequest) -> Result<EventPage> {
        let (events, headers) = self
            .get_json::<Vec<RawEvent>>(
                &format!("/users/{}/events", username),
                &[
                    ("per_page", request.per_page.to_string()),
                    ("page", request.page.to_string()),
                ],
            )
            .await?;

        log::debug!("📥 Fetched {} events from GitHub (page {})", events.len(), request.page);

        let next_page = headers
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .and_then(next_page_from_link);

        Ok(EventPage { events, next_page })
    }

    async fn get_commit_detail(&self, owner: &str, repo: &str, sha: &str) -> Result<CommitDetail> {
        let (commit, _) = self
            .get_json::<GitHubCommit>(&format!("/repos/{}/{}/commits/{}", owner, repo, sha), &[])
            .await?;

        let stats = commit.stats.unwrap_or_default();

        Ok(CommitDetail {
            author_login: commit.author.map(|a| a.login),
            committer_login: commit.committer.map(|c| c.login),
            additions: stats.additions,
            deletions: stats.deletions,
        })
    }

    async fn get_pull_request_detail(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PullRequestDetail> {
        let (pr, _) = self
            .get_json::<GitHubPullRequest>(&format!("/repos/{}/{}/pulls/{}", owner, repo, number), &[])
            .await?;

        Ok(PullRequestDetail {
            additions: pr.additions.unwrap_or(0),
            deletions: pr.deletions.unwrap_or(0),
            merged_at: pr.merged_at,
        })
    }
}

/// Extract the page number of the `rel="next"` entry of a Link header
fn next_page_from_link(link: &str) -> Option<u32> {
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == r#"rel="next""#);
        if !is_next {
            return None;
        }

        let url = Url::parse(target.trim_start_matches('<').trim_end_matches('>')).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
    })
}

// GitHub REST API response types

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubCommit {
    author: Option<GitHubUser>,
    committer: Option<GitHubUser>,
    stats: Option<GitHubCommitStats>,
}

#[derive(Debug, Default, Deserialize)]
struct GitHubCommitStats {
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
}

#[derive(Debug, Deserialize)]
struct GitHubPullRequest {
    additions: Option<i64>,
    deletions: Option<i64>,
    merged_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_page_from_link() {
        let link = r#"<https://api.github.com/user/1/events?per_page=100&page=2>; rel="next", <https://api.github.com/user/1/events?per_page=100&page=3>; rel="last""#;
        assert_eq!(next_page_from_link(link), Some(2));
    }

    #[test]
    fn test_next_page_absent_on_last_page() {
        let link = r#"<https://api.github.com/user/1/events?page=1>; rel="first", <https://api.github.com/user/1/events?page=2>; rel="prev""#;
        assert_eq!(next_page_from_link(link), None);
        assert_eq!(next_page_from_link(""), None);
    }

    #[test]
    fn test_commit_detail_with_null_author() {
        let commit: GitHubCommit = serde_json::from_value(serde_json::json!({
            "author": null,
            "committer": { "login": "web-flow" },
            "stats": { "additions": 3, "deletions": 1, "total": 4 }
        }))
        .unwrap();

        assert!(commit.author.is_none());
        assert_eq!(commit.committer.unwrap().login, "web-flow");
        assert_eq!(commit.stats.unwrap().additions, 3);
    }
}
