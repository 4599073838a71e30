use anyhow::{anyhow, bail, Context, Result};
use cron::Schedule;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::activity_aggregation::FetchOptions;
use crate::services::pagination::RetryPolicy;
use crate::utils::validators::{validate_provider, validate_url};

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub github_api_url: String,
    pub github_tokens: Vec<GitHubToken>,
    pub llm: LlmConfig,
    pub scheduler: SchedulerConfig,
    pub notifiers: NotifiersConfig,
    /// Bearer token required by the inbound webhook, when set
    pub webhook_token: Option<String>,
    pub fetch: FetchConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitHubToken {
    pub username: Option<String>,
    pub token: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub prompt_template: Option<String>,
}

/// Fridays at 15:00 UTC
pub const DEFAULT_SCHEDULER_CRON: &str = "0 0 15 * * Fri";

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Six-field cron expression (seconds first), evaluated in UTC
    pub cron: String,
    pub schedule: Schedule,
    pub window_days: i64,
}

#[derive(Clone, Debug, Default)]
pub struct NotifiersConfig {
    pub wechat_webhook_url: Option<String>,
    pub feishu_webhook_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub per_page: u32,
    pub concurrency: usize,
    pub page_retries: u32,
    pub timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup (environment, map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let provider = get("LLM_PROVIDER").unwrap_or_else(|| "deepseek".to_string());
        let (default_base_url, default_model) = provider_defaults(&provider);

        let cron = get("SCHEDULER_CRON").unwrap_or_else(|| DEFAULT_SCHEDULER_CRON.to_string());

        let config = Config {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(get("PORT"), "PORT", 8080)?,
            github_api_url: get("GITHUB_API_URL").unwrap_or_else(|| "https://api.github.com".to_string()),
            github_tokens: parse_tokens(get("GITHUB_TOKENS").as_deref().unwrap_or_default())?,
            llm: LlmConfig {
                api_key: get("LLM_API_KEY").unwrap_or_default(),
                model: get("LLM_MODEL").unwrap_or_else(|| default_model.to_string()),
                base_url: get("LLM_BASE_URL")
                    .unwrap_or_else(|| default_base_url.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                prompt_template: get("LLM_PROMPT_TEMPLATE"),
                provider,
            },
            scheduler: SchedulerConfig {
                enabled: parse_or(get("SCHEDULER_ENABLED"), "SCHEDULER_ENABLED", false)?,
                schedule: Schedule::from_str(&cron)
                    .map_err(|e| anyhow!("SCHEDULER_CRON is not a valid cron expression '{}': {}", cron, e))?,
                cron,
                window_days: parse_or(get("REPORT_WINDOW_DAYS"), "REPORT_WINDOW_DAYS", 7)?,
            },
            notifiers: NotifiersConfig {
                wechat_webhook_url: get("WECHAT_WEBHOOK_URL"),
                feishu_webhook_url: get("FEISHU_WEBHOOK_URL"),
            },
            webhook_token: get("WEBHOOK_TOKEN"),
            fetch: FetchConfig {
                per_page: parse_or(get("FETCH_PER_PAGE"), "FETCH_PER_PAGE", 100)?,
                concurrency: parse_or(get("FETCH_CONCURRENCY"), "FETCH_CONCURRENCY", 8)?,
                page_retries: parse_or(get("FETCH_PAGE_RETRIES"), "FETCH_PAGE_RETRIES", 2)?,
                timeout_secs: parse_or(get("FETCH_TIMEOUT_SECS"), "FETCH_TIMEOUT_SECS", 300)?,
            },
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.github_tokens.is_empty() {
            bail!("at least one GitHub token is required (GITHUB_TOKENS)");
        }

        if self.llm.api_key.is_empty() {
            bail!("LLM API key is required (LLM_API_KEY)");
        }

        validate_provider(&self.llm.provider)?;
        validate_url(&self.llm.base_url).context("LLM_BASE_URL")?;
        validate_url(&self.github_api_url).context("GITHUB_API_URL")?;

        if let Some(url) = &self.notifiers.wechat_webhook_url {
            validate_url(url).context("WECHAT_WEBHOOK_URL")?;
        }
        if let Some(url) = &self.notifiers.feishu_webhook_url {
            validate_url(url).context("FEISHU_WEBHOOK_URL")?;
        }

        if self.scheduler.window_days <= 0 {
            bail!("REPORT_WINDOW_DAYS must be positive");
        }
        if !(1..=100).contains(&self.fetch.per_page) {
            bail!("FETCH_PER_PAGE must be between 1 and 100");
        }

        Ok(())
    }

    /// Usernames that get scheduled and bulk reports
    pub fn report_usernames(&self) -> Vec<String> {
        self.github_tokens
            .iter()
            .filter_map(|t| t.username.clone())
            .collect()
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            per_page: self.fetch.per_page,
            concurrency: self.fetch.concurrency.max(1),
            retry: RetryPolicy {
                max_retries: self.fetch.page_retries,
                ..RetryPolicy::default()
            },
            timeout: Some(Duration::from_secs(self.fetch.timeout_secs)),
        }
    }
}

/// Token registered for `username`, else the first configured token
pub fn select_token<'a>(tokens: &'a [GitHubToken], username: &str) -> Option<&'a GitHubToken> {
    tokens
        .iter()
        .find(|t| t.username.as_deref() == Some(username))
        .or_else(|| tokens.first())
}

fn provider_defaults(provider: &str) -> (&'static str, &'static str) {
    match provider {
        "openai" => ("https://api.openai.com/v1", "gpt-4o-mini"),
        "claude" => ("https://api.anthropic.com/v1", "claude-3-5-haiku-latest"),
        _ => ("https://api.deepseek.com/v1", "deepseek-chat"),
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow!("{} has an invalid value: '{}'", key, raw)),
        None => Ok(default),
    }
}

/// Parse `user1:token1,user2:token2` (a bare `token` has no username)
fn parse_tokens(raw: &str) -> Result<Vec<GitHubToken>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((username, token)) if !token.trim().is_empty() => Ok(GitHubToken {
                username: Some(username.trim().to_string()).filter(|u| !u.is_empty()),
                token: token.trim().to_string(),
            }),
            Some(_) => Err(anyhow!("GITHUB_TOKENS entry '{}' has an empty token", entry)),
            None => Ok(GitHubToken {
                username: None,
                token: entry.to_string(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("GITHUB_TOKENS", "octocat:ghp_x"), ("LLM_API_KEY", "sk")]).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.llm.provider, "deepseek");
        assert_eq!(config.llm.model, "deepseek-chat");
        assert_eq!(config.llm.base_url, "https://api.deepseek.com/v1");
        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.cron, DEFAULT_SCHEDULER_CRON);
        assert_eq!(config.scheduler.window_days, 7);
        assert!(config.validate().is_ok());

        let options = config.fetch_options();
        assert_eq!(options.per_page, 100);
        assert_eq!(options.retry.max_retries, 2);
        assert_eq!(options.timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_parse_tokens() {
        let tokens = parse_tokens("octocat:ghp_a, hubot:ghp_b ,ghp_c").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].username.as_deref(), Some("octocat"));
        assert_eq!(tokens[1].token, "ghp_b");
        assert_eq!(tokens[2].username, None);

        assert!(parse_tokens("octocat:").is_err());
        assert!(parse_tokens("").unwrap().is_empty());
    }

    #[test]
    fn test_select_token_falls_back_to_first() {
        let config = load(&[("GITHUB_TOKENS", "octocat:a,hubot:b"), ("LLM_API_KEY", "sk")]).unwrap();

        assert_eq!(select_token(&config.github_tokens, "hubot").unwrap().token, "b");
        assert_eq!(select_token(&config.github_tokens, "stranger").unwrap().token, "a");
        assert!(select_token(&[], "octocat").is_none());
        assert_eq!(config.report_usernames(), vec!["octocat", "hubot"]);
    }

    #[test]
    fn test_validation_failures() {
        assert!(load(&[("LLM_API_KEY", "sk")]).unwrap().validate().is_err());
        assert!(load(&[("GITHUB_TOKENS", "a:b")]).unwrap().validate().is_err());
        assert!(load(&[("GITHUB_TOKENS", "a:b"), ("LLM_API_KEY", "sk"), ("LLM_PROVIDER", "bard")])
            .unwrap()
            .validate()
            .is_err());
        assert!(load(&[
            ("GITHUB_TOKENS", "a:b"),
            ("LLM_API_KEY", "sk"),
            ("FEISHU_WEBHOOK_URL", "not a url")
        ])
        .unwrap()
        .validate()
        .is_err());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(load(&[("PORT", "eighty")]).is_err());
        assert!(load(&[("SCHEDULER_CRON", "every friday")]).is_err());
        assert!(load(&[("SCHEDULER_CRON", "0 0 25 * * Fri")]).is_err());
    }

    #[test]
    fn test_scheduler_and_provider_overrides() {
        let config = load(&[
            ("LLM_PROVIDER", "claude"),
            ("SCHEDULER_ENABLED", "true"),
            ("SCHEDULER_CRON", "0 30 9 * * Mon-Fri"),
            ("LLM_BASE_URL", "https://proxy.example.com/v1/"),
        ])
        .unwrap();

        assert!(config.scheduler.enabled);
        assert_eq!(config.scheduler.cron, "0 30 9 * * Mon-Fri");
        assert!(config.scheduler.schedule.includes("2024-03-11T09:30:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap()));
        assert!(!config.scheduler.schedule.includes("2024-03-09T09:30:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap()));
        assert_eq!(config.llm.base_url, "https://proxy.example.com/v1");
        assert_eq!(config.llm.model, "claude-3-5-haiku-latest");
    }
}
