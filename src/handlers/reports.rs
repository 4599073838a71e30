use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::middleware::auth::verify_webhook_token;
use crate::models::activity::{ActivityRecord, Statistics};
use crate::services::activity_aggregation::AggregationError;
use crate::services::notifier::{broadcast, Notifier};
use crate::services::reporter::{Report, ReportError, ReportService};
use crate::utils::validators::{parse_window_bound, validate_username};

/// Shared state handed to every handler
pub struct AppState {
    pub reports: Arc<ReportService>,
    pub notifiers: Vec<Arc<dyn Notifier>>,
    /// Usernames covered by generate-all
    pub usernames: Vec<String>,
    pub webhook_token: Option<String>,
}

impl AppState {
    fn feishu(&self) -> Option<Arc<dyn Notifier>> {
        self.notifiers.iter().find(|n| n.name() == "feishu").cloned()
    }
}

// ============ Request / Response DTOs ============

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub since: Option<String>,
    pub until: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub username: String,
    pub since: Option<String>,
    pub until: Option<String>,
    #[serde(default)]
    pub notify: bool,
}

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ActivityResponse<'a> {
    #[serde(flatten)]
    record: &'a ActivityRecord,
    statistics: Statistics,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub success: bool,
    pub username: String,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub statistics: Statistics,
    pub report: String,
    /// Failed notifier deliveries, when notify was requested
    pub notify_failures: usize,
}

#[derive(Debug, Serialize)]
pub struct UserOutcome {
    pub username: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        success: false,
        error: message.into(),
    })
}

fn report_error_status(err: &ReportError) -> StatusCode {
    match err {
        ReportError::Aggregation(AggregationError::InvalidWindow { .. }) => StatusCode::BAD_REQUEST,
        ReportError::Aggregation(AggregationError::DeadlineExceeded { .. }) => StatusCode::GATEWAY_TIMEOUT,
        ReportError::Aggregation(AggregationError::SourceUnavailable { .. }) | ReportError::Llm(_) => {
            StatusCode::BAD_GATEWAY
        }
        ReportError::Source { .. } | ReportError::Format(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Resolve optional `since` / `until` strings, defaulting to the configured
/// window ending now.
fn resolve_window(
    reports: &ReportService,
    since: Option<&str>,
    until: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    let until = match until {
        Some(raw) => parse_window_bound(raw, true).map_err(|e| format!("Invalid until: {}", e))?,
        None => now,
    };
    let since = match since {
        Some(raw) => parse_window_bound(raw, false).map_err(|e| format!("Invalid since: {}", e))?,
        None => reports.default_window(until).0,
    };
    Ok((since, until))
}

// ============ Handlers ============

/// GET /api/v1/health
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

/// GET /api/v1/users/{username}/activity
/// Aggregated activity without the LLM step
pub async fn get_user_activity(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<WindowQuery>,
) -> HttpResponse {
    let username = path.into_inner();
    if let Err(e) = validate_username(&username) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let (since, until) =
        match resolve_window(&state.reports, query.since.as_deref(), query.until.as_deref(), Utc::now()) {
            Ok(window) => window,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
        };

    match state.reports.fetch_activity(&username, since, until).await {
        Ok(record) => HttpResponse::Ok().json(ActivityResponse {
            statistics: record.statistics(),
            record: &record,
        }),
        Err(e) => {
            log::error!("Activity fetch failed for {}: {}", username, e);
            error_response(report_error_status(&e), e.to_string())
        }
    }
}

/// POST /api/v1/reports/generate
pub async fn generate_report(state: web::Data<AppState>, body: web::Json<GenerateRequest>) -> HttpResponse {
    let request = body.into_inner();
    if let Err(e) = validate_username(&request.username) {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    let (since, until) =
        match resolve_window(&state.reports, request.since.as_deref(), request.until.as_deref(), Utc::now()) {
            Ok(window) => window,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
        };

    log::info!("📝 Report requested for {}", request.username);

    let report = match state.reports.generate_report(&request.username, since, until).await {
        Ok(report) => report,
        Err(e) => {
            log::error!("Report generation failed for {}: {}", request.username, e);
            return error_response(report_error_status(&e), e.to_string());
        }
    };

    let notify_failures = if request.notify {
        broadcast(&state.notifiers, &report.content).await
    } else {
        0
    };

    HttpResponse::Ok().json(ReportResponse {
        success: true,
        username: report.username,
        since: report.since,
        until: report.until,
        statistics: report.statistics,
        report: report.content,
        notify_failures,
    })
}

/// POST /api/v1/reports/generate-all
/// One report per configured username
pub async fn generate_all_reports(state: web::Data<AppState>) -> HttpResponse {
    let (since, until) = state.reports.default_window(Utc::now());

    let outcomes: Vec<UserOutcome> = state
        .reports
        .generate_all(&state.usernames, since, until)
        .await
        .into_iter()
        .map(|(username, outcome)| match outcome {
            Ok(report) => UserOutcome {
                username,
                success: true,
                report: Some(report.content),
                error: None,
            },
            Err(e) => UserOutcome {
                username,
                success: false,
                report: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "success": outcomes.iter().all(|o| o.success),
        "results": outcomes,
    }))
}

/// POST /api/v1/webhook
/// Accepts immediately; the report is produced in the background and
/// delivered to Feishu. Rejected up front when Feishu is not configured.
pub async fn webhook(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<WebhookRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    verify_webhook_token(&req, state.webhook_token.as_deref())?;

    let Some(feishu) = state.feishu() else {
        return Ok(error_response(StatusCode::BAD_REQUEST, "Feishu notification is not enabled"));
    };

    let content = body.into_inner().content;
    if content.trim().is_empty() {
        return Ok(error_response(StatusCode::BAD_REQUEST, "content must not be empty"));
    }

    log::info!("📬 Webhook received ({} chars)", content.chars().count());

    let state = state.into_inner();
    actix_web::rt::spawn(async move {
        process_webhook(&state, feishu.as_ref(), &content).await;
    });

    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "success": true,
        "message": "accepted",
    })))
}

async fn webhook_report(state: &AppState, content: &str) -> Result<Report, String> {
    let username = state
        .reports
        .generator()
        .extract_username(content)
        .await
        .map_err(|e| format!("could not extract a GitHub username: {}", e))?;
    validate_username(&username).map_err(|e| format!("extracted username '{}' is invalid: {}", username, e))?;

    log::info!("🔎 Webhook resolved GitHub user {}", username);

    let (since, until) = state.reports.default_window(Utc::now());
    state
        .reports
        .generate_report(&username, since, until)
        .await
        .map_err(|e| format!("report for {} failed: {}", username, e))
}

async fn process_webhook(state: &AppState, feishu: &dyn Notifier, content: &str) {
    let message = match webhook_report(state, content).await {
        Ok(report) => report.content,
        Err(e) => {
            log::error!("❌ Webhook processing failed: {}", e);
            format!("Failed to generate report: {}", e)
        }
    };

    if let Err(e) = feishu.send(&message).await {
        log::error!("❌ {}", e);
    }
}
