use crate::auth::{auth_cookie, require_admin, token_matches};
use crate::config::Config;
use crate::db_storage::LeadStore;
use crate::errors::AppError;
use crate::export::{export_filename, parse_export_range, render_csv};
use crate::ingestion::{DeliveryDispatcher, LeadIngestion};
use crate::models::*;
use crate::rate_limiter::source_key;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

pub const SUBMIT_SUCCESS_MESSAGE: &str = "Thank you! We will contact you shortly.";

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Lead persistence, shared with the ingestion pipeline.
    pub store: Arc<dyn LeadStore>,
    /// Consumer submission pipeline.
    pub ingestion: LeadIngestion,
    /// Background and manual delivery runs.
    pub dispatcher: DeliveryDispatcher,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn LeadStore>,
        ingestion: LeadIngestion,
        dispatcher: DeliveryDispatcher,
    ) -> Self {
        Self {
            config,
            store,
            ingestion,
            dispatcher,
        }
    }
}

fn bad_json(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

fn bad_query(rejection: QueryRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "quotelinker-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/leads
///
/// Public quote-request intake. The caller is rate limited before the body is
/// inspected; a valid lead is stored and handed to the delivery task, and the
/// response is sent without waiting for delivery.
///
/// # Returns
///
/// * `201` with the new lead id.
/// * `400` with one message per failing field.
/// * `429` when the caller exceeded the submission cap.
/// * `500` when the lead could not be stored.
#[utoipa::path(
    post,
    path = "/api/leads",
    tag = "leads",
    request_body = LeadSubmission,
    responses(
        (status = 201, description = "Lead accepted", body = SubmitLeadResponse),
        (status = 400, description = "Validation failed"),
        (status = 429, description = "Too many requests"),
        (status = 500, description = "Lead could not be saved")
    )
)]
pub async fn submit_lead(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<LeadSubmission>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitLeadResponse>), AppError> {
    let key = source_key(&headers, peer.map(|ConnectInfo(addr)| addr));
    state.ingestion.admit(&key)?;

    let Json(submission) = payload.map_err(bad_json)?;
    let accepted = state.ingestion.accept(&submission).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitLeadResponse {
            success: true,
            lead_id: accepted.lead.id,
            message: SUBMIT_SUCCESS_MESSAGE.to_string(),
        }),
    ))
}

/// POST /api/notify
///
/// Re-runs delivery for a stored lead and waits for the outcome.
#[utoipa::path(
    post,
    path = "/api/notify",
    tag = "admin",
    request_body = NotifyRequest,
    responses(
        (status = 200, description = "Delivery run finished", body = NotifyResponse),
        (status = 400, description = "Malformed request or delivery already running"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 404, description = "Lead not found")
    ),
    security(("admin_token" = []))
)]
pub async fn notify_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<Json<NotifyResponse>, AppError> {
    require_admin(&state.config, &headers)?;
    let Json(request) = payload.map_err(bad_json)?;

    tracing::info!("Manual delivery requested for lead {}", request.lead_id);
    let report = state.dispatcher.redeliver(request.lead_id).await?;

    Ok(Json(NotifyResponse {
        success: report.success,
        attempts: report.attempts,
        error: report.error,
    }))
}

/// GET /api/admin/leads
#[utoipa::path(
    get,
    path = "/api/admin/leads",
    tag = "admin",
    params(LeadFilter),
    responses(
        (status = 200, description = "One page of leads", body = LeadPage),
        (status = 400, description = "Malformed query"),
        (status = 401, description = "Missing or invalid admin token")
    ),
    security(("admin_token" = []))
)]
pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<LeadFilter>, QueryRejection>,
) -> Result<Json<LeadPage>, AppError> {
    require_admin(&state.config, &headers)?;
    let Query(filter) = query.map_err(bad_query)?;

    let page = state.store.list(&filter).await?;
    tracing::debug!(
        "Listed {} of {} leads (page {})",
        page.leads.len(),
        page.pagination.total,
        page.pagination.page
    );

    Ok(Json(page))
}

/// PUT /api/admin/leads
///
/// Updates the sales-workflow fields of one lead. Contact details and
/// delivery bookkeeping cannot be changed here; any such field is rejected.
#[utoipa::path(
    put,
    path = "/api/admin/leads",
    tag = "admin",
    request_body = LeadUpdate,
    responses(
        (status = 200, description = "Updated lead", body = LeadUpdateResponse),
        (status = 400, description = "Unknown field or nothing to update"),
        (status = 401, description = "Missing or invalid admin token"),
        (status = 404, description = "Lead not found")
    ),
    security(("admin_token" = []))
)]
pub async fn update_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<LeadUpdate>, JsonRejection>,
) -> Result<Json<LeadUpdateResponse>, AppError> {
    require_admin(&state.config, &headers)?;
    let Json(update) = payload.map_err(bad_json)?;

    if update.is_empty() {
        return Err(AppError::BadRequest("No updatable fields provided".to_string()));
    }

    let lead = state.store.update(update.id, &update).await?;
    tracing::info!("Lead {} updated (status={})", lead.id, lead.status);

    Ok(Json(LeadUpdateResponse { lead }))
}

/// GET /api/admin/export
#[utoipa::path(
    get,
    path = "/api/admin/export",
    tag = "admin",
    params(ExportQuery),
    responses(
        (status = 200, description = "CSV file", content_type = "text/csv", body = String),
        (status = 400, description = "Unparseable date bound"),
        (status = 401, description = "Missing or invalid admin token")
    ),
    security(("admin_token" = []))
)]
pub async fn export_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    require_admin(&state.config, &headers)?;
    let Query(query) = query.map_err(bad_query)?;
    let range = parse_export_range(&query)?;

    let leads = state.store.export(&range).await?;
    tracing::info!("Exporting {} leads", leads.len());

    let disposition = format!(
        "attachment; filename=\"{}\"",
        export_filename(Utc::now().date_naive())
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        render_csv(&leads),
    )
        .into_response())
}

/// POST /api/admin/auth
///
/// Exchanges the admin token for an HttpOnly session cookie.
#[utoipa::path(
    post,
    path = "/api/admin/auth",
    tag = "admin",
    request_body = AuthRequest,
    responses(
        (status = 200, description = "Cookie set"),
        (status = 400, description = "Token missing"),
        (status = 401, description = "Invalid token")
    )
)]
pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(bad_json)?;

    let token = request
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Token is required".to_string()))?;

    let valid = state
        .config
        .admin_token
        .as_deref()
        .is_some_and(|expected| token_matches(&token, expected));
    if !valid {
        return Err(AppError::Unauthorized("Invalid token".to_string()));
    }

    tracing::info!("Admin session established");
    Ok((
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            auth_cookie(&token, state.config.cookie_secure),
        )],
        Json(json!({ "success": true })),
    )
        .into_response())
}
