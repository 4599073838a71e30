use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const PUSH_EVENT: &str = "PushEvent";
pub const PULL_REQUEST_EVENT: &str = "PullRequestEvent";
pub const ISSUES_EVENT: &str = "IssuesEvent";
pub const PULL_REQUEST_REVIEW_EVENT: &str = "PullRequestReviewEvent";

/// One entry of a user's public event timeline, as returned by the platform.
///
/// The payload is kept as raw JSON until classification so that a single
/// malformed entry never fails decoding of the whole page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub repo: EventRepo,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRepo {
    #[serde(default)]
    pub name: String,
}

/// Decoded event payload, one variant per event kind we aggregate
#[derive(Debug, Clone)]
pub enum EventPayload {
    Push(PushPayload),
    PullRequest(PullRequestPayload),
    Issues(IssuesPayload),
    Review(ReviewPayload),
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub commits: Vec<PushCommit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushCommit {
    pub sha: Option<String>,
    pub message: Option<String>,
    pub author: Option<PushCommitAuthor>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushCommitAuthor {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestPayload {
    pub pull_request: PullRequestItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestItem {
    pub number: i64,
    pub title: Option<String>,
    pub html_url: Option<String>,
    pub state: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub comments: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuesPayload {
    pub issue: IssueItem,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueItem {
    pub number: i64,
    pub title: Option<String>,
    pub html_url: Option<String>,
    pub state: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub comments: Option<i64>,
    /// Present when the "issue" is actually a pull request
    pub pull_request: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewPayload {
    pub review: ReviewItem,
    pub pull_request: ReviewedPullRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewItem {
    pub user: Option<EventUser>,
    pub state: Option<String>,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventUser {
    pub login: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewedPullRequest {
    pub number: i64,
    pub title: Option<String>,
}

impl RawEvent {
    /// Parsed event timestamp; None when absent or not RFC 3339
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Decode the payload according to the declared event kind.
    /// Unknown kinds decode to `EventPayload::Other` and never fail.
    pub fn decode_payload(&self) -> Result<EventPayload, serde_json::Error> {
        let payload = match self.kind.as_str() {
            PUSH_EVENT => EventPayload::Push(PushPayload::deserialize(&self.payload)?),
            PULL_REQUEST_EVENT => {
                EventPayload::PullRequest(PullRequestPayload::deserialize(&self.payload)?)
            }
            ISSUES_EVENT => EventPayload::Issues(IssuesPayload::deserialize(&self.payload)?),
            PULL_REQUEST_REVIEW_EVENT => {
                EventPayload::Review(ReviewPayload::deserialize(&self.payload)?)
            }
            _ => EventPayload::Other,
        };

        Ok(payload)
    }
}
