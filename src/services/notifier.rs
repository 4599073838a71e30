use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::utils::config::NotifiersConfig;
use crate::utils::http_client::create_http_client;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("failed to send {channel} message: {source}")]
    Request {
        channel: &'static str,
        source: reqwest::Error,
    },
    #[error("{channel} webhook returned status {status}: {body}")]
    Status {
        channel: &'static str,
        status: u16,
        body: String,
    },
}

/// Outbound chat webhook
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, content: &str) -> Result<(), NotifierError>;
}

/// WeChat Work group robot (markdown message)
pub struct WeChatNotifier {
    webhook_url: String,
    http: Client,
}

/// Feishu / Lark custom bot (text message)
pub struct FeishuNotifier {
    webhook_url: String,
    http: Client,
}

#[derive(Debug, Serialize)]
struct WeChatMarkdownMessage<'a> {
    msgtype: &'static str,
    markdown: WeChatMarkdown<'a>,
}

#[derive(Debug, Serialize)]
struct WeChatMarkdown<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct FeishuMessage<'a> {
    msg_type: &'static str,
    content: FeishuText<'a>,
}

#[derive(Debug, Serialize)]
struct FeishuText<'a> {
    text: &'a str,
}

impl WeChatNotifier {
    pub fn new(webhook_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            webhook_url: webhook_url.to_string(),
            http: create_http_client()?,
        })
    }
}

impl FeishuNotifier {
    pub fn new(webhook_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            webhook_url: webhook_url.to_string(),
            http: create_http_client()?,
        })
    }
}

async fn post_json<T: Serialize + Sync>(
    http: &Client,
    channel: &'static str,
    url: &str,
    body: &T,
) -> Result<(), NotifierError> {
    let response = http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|source| NotifierError::Request { channel, source })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(NotifierError::Status {
            channel,
            status: status.as_u16(),
            body,
        });
    }

    Ok(())
}

#[async_trait]
impl Notifier for WeChatNotifier {
    fn name(&self) -> &'static str {
        "wechat"
    }

    async fn send(&self, content: &str) -> Result<(), NotifierError> {
        let message = WeChatMarkdownMessage {
            msgtype: "markdown",
            markdown: WeChatMarkdown { content },
        };
        post_json(&self.http, self.name(), &self.webhook_url, &message).await
    }
}

#[async_trait]
impl Notifier for FeishuNotifier {
    fn name(&self) -> &'static str {
        "feishu"
    }

    async fn send(&self, content: &str) -> Result<(), NotifierError> {
        let message = FeishuMessage {
            msg_type: "text",
            content: FeishuText { text: content },
        };
        post_json(&self.http, self.name(), &self.webhook_url, &message).await
    }
}

/// Every notifier whose webhook URL is configured
pub fn from_config(config: &NotifiersConfig) -> anyhow::Result<Vec<Arc<dyn Notifier>>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    if let Some(url) = &config.wechat_webhook_url {
        notifiers.push(Arc::new(WeChatNotifier::new(url)?));
    }
    if let Some(url) = &config.feishu_webhook_url {
        notifiers.push(Arc::new(FeishuNotifier::new(url)?));
    }

    Ok(notifiers)
}

/// Send `content` through every notifier. Returns how many deliveries failed.
pub async fn broadcast(notifiers: &[Arc<dyn Notifier>], content: &str) -> usize {
    let mut failures = 0;
    for notifier in notifiers {
        match notifier.send(content).await {
            Ok(()) => log::info!("📨 Sent report via {}", notifier.name()),
            Err(e) => {
                log::error!("❌ {}", e);
                failures += 1;
            }
        }
    }
    failures
}
