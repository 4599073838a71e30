use anyhow::Result;
use serde_json::{json, Map, Value};

use crate::models::activity::{ActivityRecord, CommitRecord, IssueRecord, PullRequestRecord, ReviewRecord};

const SHORT_SHA_LEN: usize = 7;

/// Render an activity record as the pretty-printed JSON document handed to
/// the report generator.
pub fn format_activity_data(record: &ActivityRecord) -> Result<String> {
    Ok(serde_json::to_string_pretty(&activity_document(record))?)
}

pub fn activity_document(record: &ActivityRecord) -> Value {
    json!({
        "username": record.username(),
        "time_range": format!(
            "{} ~ {}",
            record.since().format("%Y-%m-%d"),
            record.until().format("%Y-%m-%d")
        ),
        "statistics": record.statistics().to_map(),
        "commits": record.commits.iter().map(format_commit).collect::<Vec<_>>(),
        "pull_requests": record.pull_requests.iter().map(format_pull_request).collect::<Vec<_>>(),
        "issues": record.issues.iter().map(format_issue).collect::<Vec<_>>(),
        "reviews": record.reviews.iter().map(format_review).collect::<Vec<_>>(),
    })
}

pub fn short_sha(sha: &str) -> &str {
    match sha.char_indices().nth(SHORT_SHA_LEN) {
        Some((idx, _)) => &sha[..idx],
        None => sha,
    }
}

fn format_commit(commit: &CommitRecord) -> Value {
    json!({
        "sha": short_sha(&commit.sha),
        "message": commit.message,
        "repo": commit.repository,
        "author": commit.author,
        "date": commit.date.format("%Y-%m-%d %H:%M").to_string(),
        "additions": commit.additions,
        "deletions": commit.deletions,
    })
}

fn format_pull_request(pr: &PullRequestRecord) -> Value {
    let mut data = Map::new();
    data.insert("number".to_string(), json!(pr.number));
    data.insert("title".to_string(), json!(pr.title));
    data.insert("repo".to_string(), json!(pr.repository));
    data.insert("state".to_string(), json!(pr.state));
    data.insert("url".to_string(), json!(pr.url));
    data.insert("created".to_string(), json!(pr.created_at.format("%Y-%m-%d").to_string()));
    data.insert("additions".to_string(), json!(pr.additions));
    data.insert("deletions".to_string(), json!(pr.deletions));
    data.insert("comments".to_string(), json!(pr.comments));

    if let Some(merged_at) = pr.merged_at {
        data.insert("merged".to_string(), json!(merged_at.format("%Y-%m-%d").to_string()));
    }

    Value::Object(data)
}

fn format_issue(issue: &IssueRecord) -> Value {
    let mut data = Map::new();
    data.insert("number".to_string(), json!(issue.number));
    data.insert("title".to_string(), json!(issue.title));
    data.insert("repo".to_string(), json!(issue.repository));
    data.insert("state".to_string(), json!(issue.state));
    data.insert("url".to_string(), json!(issue.url));
    data.insert("created".to_string(), json!(issue.created_at.format("%Y-%m-%d").to_string()));
    data.insert("comments".to_string(), json!(issue.comments));

    if let Some(closed_at) = issue.closed_at {
        data.insert("closed".to_string(), json!(closed_at.format("%Y-%m-%d").to_string()));
    }

    Value::Object(data)
}

fn format_review(review: &ReviewRecord) -> Value {
    json!({
        "pr_number": review.pr_number,
        "pr_title": review.pr_title,
        "repo": review.repository,
        "state": review.state,
        "url": review.url,
        "created": review.created_at.format("%Y-%m-%d").to_string(),
    })
}
