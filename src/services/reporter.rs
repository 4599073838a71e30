use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::activity::{ActivityRecord, Statistics};
use crate::services::activity_aggregation::{ActivityAggregationService, AggregationError, FetchOptions};
use crate::services::git_platforms::{EventSource, GitHubClient, PlatformConfig};
use crate::services::llm::{LlmError, ReportGenerator};
use crate::services::report_formatter::format_activity_data;
use crate::utils::config::{select_token, Config, GitHubToken};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("no GitHub client for {username}: {source}")]
    Source {
        username: String,
        source: anyhow::Error,
    },
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error("failed to format activity data: {0}")]
    Format(anyhow::Error),
    #[error("failed to generate report: {0}")]
    Llm(#[from] LlmError),
}

/// Hands out an authenticated event source per username
pub trait SourceProvider: Send + Sync {
    fn source_for(&self, username: &str) -> anyhow::Result<Arc<dyn EventSource>>;
}

/// Builds GitHub REST clients from the configured token list
pub struct GitHubSources {
    platform: PlatformConfig,
    tokens: Vec<GitHubToken>,
}

impl GitHubSources {
    pub fn from_config(config: &Config) -> Self {
        Self {
            platform: PlatformConfig::github_with_api(&config.github_api_url),
            tokens: config.github_tokens.clone(),
        }
    }
}

impl SourceProvider for GitHubSources {
    fn source_for(&self, username: &str) -> anyhow::Result<Arc<dyn EventSource>> {
        let token = select_token(&self.tokens, username).ok_or_else(|| anyhow!("no GitHub token configured"))?;

        let client = GitHubClient::new(self.platform.clone(), &token.token)?;
        Ok(Arc::new(client))
    }
}

/// Fill in the login of every token configured without a username. Tokens
/// that cannot be resolved keep no username and are left out of scheduled
/// reports.
pub async fn resolve_token_owners(platform: &PlatformConfig, tokens: &mut [GitHubToken]) {
    for token in tokens.iter_mut().filter(|t| t.username.is_none()) {
        let login = match GitHubClient::new(platform.clone(), &token.token) {
            Ok(client) => client.authenticated_login().await,
            Err(e) => Err(e),
        };

        match login {
            Ok(login) => {
                log::info!("🔑 Token belongs to GitHub user {}", login);
                token.username = Some(login);
            }
            Err(e) => log::warn!("⚠️ Could not resolve the owner of a GitHub token: {:#}", e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub username: String,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub statistics: Statistics,
    pub content: String,
}

pub struct ReportService {
    sources: Arc<dyn SourceProvider>,
    generator: Arc<dyn ReportGenerator>,
    options: FetchOptions,
    window_days: i64,
}

impl ReportService {
    pub fn new(
        sources: Arc<dyn SourceProvider>,
        generator: Arc<dyn ReportGenerator>,
        options: FetchOptions,
        window_days: i64,
    ) -> Self {
        Self {
            sources,
            generator,
            options,
            window_days,
        }
    }

    pub fn generator(&self) -> &Arc<dyn ReportGenerator> {
        &self.generator
    }

    /// `[now - window_days, now]`
    pub fn default_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - Duration::days(self.window_days), now)
    }

    pub async fn fetch_activity(
        &self,
        username: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ActivityRecord, ReportError> {
        let source = self
            .sources
            .source_for(username)
            .map_err(|source| ReportError::Source {
                username: username.to_string(),
                source,
            })?;

        let service = ActivityAggregationService::new(source, self.options.clone());
        Ok(service.fetch_activities(username, since, until).await?)
    }

    /// Fetch, format and summarize one user's activity
    pub async fn generate_report(
        &self,
        username: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Report, ReportError> {
        log::info!("📥 Fetching GitHub activity for {}", username);
        let record = self.fetch_activity(username, since, until).await?;

        if record.is_empty() {
            log::info!("💤 No activity for {} between {} and {}", username, since, until);
        }

        let statistics = record.statistics();
        log::info!(
            "📊 {}: {} commits, {} PRs, {} issues, {} reviews",
            username,
            statistics.total_commits,
            statistics.total_prs,
            statistics.total_issues,
            statistics.total_reviews
        );

        let activity_data = format_activity_data(&record).map_err(ReportError::Format)?;

        log::info!("🤖 Generating report for {}", username);
        let content = self.generator.generate_report(username, &activity_data).await?;
        log::info!("✅ Report for {} generated ({} chars)", username, content.chars().count());

        Ok(Report {
            username: username.to_string(),
            since,
            until,
            statistics,
            content,
        })
    }

    /// One outcome per username, in input order. A failure for one user does
    /// not stop the others.
    pub async fn generate_all(
        &self,
        usernames: &[String],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Vec<(String, Result<Report, ReportError>)> {
        let mut outcomes = Vec::with_capacity(usernames.len());
        for username in usernames {
            let outcome = self.generate_report(username, since, until).await;
            if let Err(e) = &outcome {
                log::error!("❌ Report for {} failed: {}", username, e);
            }
            outcomes.push((username.clone(), outcome));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::RawEvent;
    use crate::services::git_platforms::{CommitDetail, EventPage, PageRequest, PullRequestDetail};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Mutex;

    struct OnePageSource {
        events: Vec<RawEvent>,
    }

    #[async_trait]
    impl EventSource for OnePageSource {
        async fn list_events(&self, _username: &str, _page: PageRequest) -> anyhow::Result<EventPage> {
            Ok(EventPage {
                events: self.events.clone(),
                next_page: None,
            })
        }

        async fn get_commit_detail(&self, _owner: &str, _repo: &str, _sha: &str) -> anyhow::Result<CommitDetail> {
            Ok(CommitDetail {
                author_login: Some("octocat".to_string()),
                committer_login: None,
                additions: 10,
                deletions: 3,
            })
        }

        async fn get_pull_request_detail(
            &self,
            _owner: &str,
            _repo: &str,
            _number: i64,
        ) -> anyhow::Result<PullRequestDetail> {
            Ok(PullRequestDetail::default())
        }
    }

    struct FixedSources {
        source: Arc<dyn EventSource>,
        requested: Mutex<Vec<String>>,
    }

    impl SourceProvider for FixedSources {
        fn source_for(&self, username: &str) -> anyhow::Result<Arc<dyn EventSource>> {
            self.requested.lock().unwrap().push(username.to_string());
            if username == "ghost" {
                return Err(anyhow!("no token"));
            }
            Ok(self.source.clone())
        }
    }

    struct EchoGenerator {
        fail: bool,
    }

    #[async_trait]
    impl ReportGenerator for EchoGenerator {
        async fn generate_report(&self, username: &str, activity_data: &str) -> Result<String, LlmError> {
            if self.fail {
                return Err(LlmError::InvalidResponse("empty".to_string()));
            }
            Ok(format!("report for {} ({} bytes)", username, activity_data.len()))
        }

        async fn extract_username(&self, content: &str) -> Result<String, LlmError> {
            Ok(content.trim().to_string())
        }
    }

    fn push_event() -> RawEvent {
        serde_json::from_value(json!({
            "id": "1",
            "type": "PushEvent",
            "repo": { "name": "octo/repo" },
            "created_at": "2024-03-02T10:00:00Z",
            "payload": { "commits": [{ "sha": "abc1234def", "message": "Fix", "url": "" }] }
        }))
        .unwrap()
    }

    fn service(fail: bool) -> (ReportService, Arc<FixedSources>) {
        let sources = Arc::new(FixedSources {
            source: Arc::new(OnePageSource {
                events: vec![push_event()],
            }),
            requested: Mutex::new(Vec::new()),
        });
        let service = ReportService::new(
            sources.clone(),
            Arc::new(EchoGenerator { fail }),
            FetchOptions::default(),
            7,
        );
        (service, sources)
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_generate_report() {
        let (service, _) = service(false);
        let (since, until) = window();

        let report = service.generate_report("octocat", since, until).await.unwrap();

        assert_eq!(report.username, "octocat");
        assert_eq!(report.statistics.total_commits, 1);
        assert_eq!(report.statistics.code_additions, 10);
        assert!(report.content.starts_with("report for octocat"));
    }

    #[tokio::test]
    async fn test_llm_failure_is_reported() {
        let (service, _) = service(true);
        let (since, until) = window();

        let err = service.generate_report("octocat", since, until).await.unwrap_err();
        assert!(matches!(err, ReportError::Llm(_)));
    }

    #[tokio::test]
    async fn test_generate_all_keeps_going_after_failure() {
        let (service, sources) = service(false);
        let (since, until) = window();
        let users = vec!["ghost".to_string(), "octocat".to_string()];

        let outcomes = service.generate_all(&users, since, until).await;

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].1, Err(ReportError::Source { .. })));
        assert!(outcomes[1].1.is_ok());
        assert_eq!(*sources.requested.lock().unwrap(), users);
    }

    #[test]
    fn test_default_window() {
        let (service, _) = service(false);
        let now = Utc.with_ymd_and_hms(2024, 3, 8, 15, 0, 0).unwrap();
        let (since, until) = service.default_window(now);
        assert_eq!(until, now);
        assert_eq!(since, Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_github_sources_token_selection() {
        let sources = GitHubSources {
            platform: PlatformConfig::github(),
            tokens: Vec::new(),
        };
        assert!(sources.source_for("octocat").is_err());

        let sources = GitHubSources {
            platform: PlatformConfig::github(),
            tokens: vec![GitHubToken {
                username: None,
                token: "ghp_x".to_string(),
            }],
        };
        assert!(sources.source_for("anyone").is_ok());
    }
}
