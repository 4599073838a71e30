use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::config::LlmConfig;
use crate::utils::http_client::create_http_client_with_timeout;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"You are a personal GitHub activity summarizer. Using the GitHub activity data below, write a concise, technical, weekly-report style summary.

Requirements:
1. Group by project. For each project give 2-3 lines on the main technical progress: results, optimizations, problems solved. Do not list individual commits or PRs.
2. Overall analysis. Summarize the main technical directions (new features, performance, architecture), name a representative problem and how it was solved, and back it up with numbers (commits, lines added and deleted) without itemizing them.
3. Style. Keep it as tight as a spoken stand-up update; focus on what was done and why it matters, not on how much.

Output template:

# [{username}](https://github.com/{username}) weekly GitHub activity

## Project A
- Key progress 1
- Key progress 2

## Overall analysis
Main focus: ... Representative problem: ... This period: {C} commits, {A} lines added, {D} lines deleted.

GitHub activity data:
{activity_data}
"#;

const USERNAME_PROMPT: &str = "Extract the GitHub username from the following content. Reply with the username only, nothing else.\n\nContent:\n{content}\n\nGitHub username:";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("unsupported LLM provider: {0}")]
    UnsupportedProvider(String),
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{provider} API error: {message}")]
    Api { provider: String, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Turns formatted activity data into prose
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate_report(&self, username: &str, activity_data: &str) -> Result<String, LlmError>;

    /// Pull a GitHub username out of free-form chat content
    async fn extract_username(&self, content: &str) -> Result<String, LlmError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Protocol {
    /// `/chat/completions` (OpenAI, DeepSeek, compatible gateways)
    ChatCompletions,
    /// Anthropic `/messages`
    Messages,
}

pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
    protocol: Protocol,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.config.provider)
            .field("model", &self.config.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let protocol = match config.provider.as_str() {
            "openai" | "deepseek" | "custom" => Protocol::ChatCompletions,
            "claude" => Protocol::Messages,
            other => return Err(LlmError::UnsupportedProvider(other.to_string())),
        };

        let http = create_http_client_with_timeout(REQUEST_TIMEOUT)
            .map_err(|e| LlmError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http,
            config,
            protocol,
        })
    }

    fn render_prompt(&self, username: &str, activity_data: &str) -> String {
        let template = self
            .config
            .prompt_template
            .as_deref()
            .unwrap_or(DEFAULT_PROMPT_TEMPLATE);
        render_template(template, username, activity_data)
    }

    async fn complete(&self, system: Option<&str>, user: &str) -> Result<String, LlmError> {
        match self.protocol {
            Protocol::ChatCompletions => self.chat_completion(system, user).await,
            Protocol::Messages => self.messages(system, user).await,
        }
    }

    async fn chat_completion(&self, system: Option<&str>, user: &str) -> Result<String, LlmError> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: user.to_string(),
        });

        let request = ChatRequest {
            model: &self.config.model,
            messages,
        };

        let response: ChatResponse = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(LlmError::Api {
                provider: self.config.provider.clone(),
                message: error.message,
            });
        }

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))
    }

    async fn messages(&self, system: Option<&str>, user: &str) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: user.to_string(),
            }],
        };

        let response: MessagesResponse = self
            .http
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(LlmError::Api {
                provider: self.config.provider.clone(),
                message: error.message,
            });
        }

        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        if text.is_empty() {
            return Err(LlmError::InvalidResponse("no text content in response".to_string()));
        }

        Ok(text)
    }
}

#[async_trait]
impl ReportGenerator for LlmClient {
    async fn generate_report(&self, username: &str, activity_data: &str) -> Result<String, LlmError> {
        let system = self.render_prompt(username, activity_data);
        self.complete(Some(&system), activity_data).await
    }

    async fn extract_username(&self, content: &str) -> Result<String, LlmError> {
        let prompt = USERNAME_PROMPT.replace("{content}", content);
        let answer = self.complete(None, &prompt).await?;
        Ok(clean_username(&answer))
    }
}

pub fn render_template(template: &str, username: &str, activity_data: &str) -> String {
    template
        .replace("{username}", username)
        .replace("{activity_data}", activity_data)
}

/// Trim model chatter around a username answer ("@octocat\n" -> "octocat")
fn clean_username(answer: &str) -> String {
    answer
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| c == '@' || c == '`' || c == '"' || c == '\'' || c == '.')
        .to_string()
}

// Wire types

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            api_key: "sk-test".to_string(),
            model: "test-model".to_string(),
            base_url: "http://localhost:9".to_string(),
            prompt_template: None,
        }
    }

    #[test]
    fn test_provider_selection() {
        assert_eq!(LlmClient::new(config("deepseek")).unwrap().protocol, Protocol::ChatCompletions);
        assert_eq!(LlmClient::new(config("openai")).unwrap().protocol, Protocol::ChatCompletions);
        assert_eq!(LlmClient::new(config("claude")).unwrap().protocol, Protocol::Messages);
        assert!(matches!(
            LlmClient::new(config("bard")),
            Err(LlmError::UnsupportedProvider(p)) if p == "bard"
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = LlmClient::new(config("openai")).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("sk-test"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_render_template() {
        let rendered = render_template("hi {username}: {activity_data}", "octocat", "{}");
        assert_eq!(rendered, "hi octocat: {}");

        let mut cfg = config("openai");
        cfg.prompt_template = Some("custom {username}".to_string());
        let client = LlmClient::new(cfg).unwrap();
        assert_eq!(client.render_prompt("octocat", "data"), "custom octocat");

        let client = LlmClient::new(config("openai")).unwrap();
        assert!(client.render_prompt("octocat", "DATA").contains("DATA"));
    }

    #[test]
    fn test_clean_username() {
        assert_eq!(clean_username("octocat"), "octocat");
        assert_eq!(clean_username("  @octocat\n"), "octocat");
        assert_eq!(clean_username("`octo-cat`."), "octo-cat");
        assert_eq!(clean_username(""), "");
    }

    #[test]
    fn test_response_decoding() {
        let chat: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"report"}}]}"#,
        )
        .unwrap();
        assert_eq!(chat.choices[0].message.content, "report");

        let err: ChatResponse = serde_json::from_str(r#"{"error":{"message":"bad key"}}"#).unwrap();
        assert_eq!(err.error.unwrap().message, "bad key");

        let messages: MessagesResponse =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"hello"}]}"#).unwrap();
        assert_eq!(messages.content[0].text.as_deref(), Some("hello"));
    }
}
