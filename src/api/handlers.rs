//! Request Handlers
//!
//! Thin adapters from HTTP to [`LedgerServices`]. Business rejections come
//! back as 4xx with the ledger's error code.

use super::{
    errors::ApiError,
    middleware::{RequestId, API_KEY_HEADER},
    models::*,
};
use crate::{
    errors::WagerError,
    services::{LedgerServices, ProgressReport},
    types::{MatchRecord, TrackedSubject, UserAccount},
    wager_service::{PlaceWagerRequest, WagerReceipt},
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
pub struct AppState {
    pub services: Arc<LedgerServices>,
    /// `None` leaves the settlement trigger open (development only)
    pub settlement_api_key: Option<String>,
    pub version: String,
}

fn validate_settlement_api_key(state: &AppState, headers: &HeaderMap, request_id: &str) -> Result<(), ApiError> {
    let Some(expected) = state.settlement_api_key.as_deref() else {
        return Ok(());
    };
    let provided = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if provided == Some(expected) {
        Ok(())
    } else {
        warn!(request_id, "Rejected settlement trigger with bad API key");
        Err(ApiError::unauthorized(
            request_id.to_string(),
            "Invalid or missing settlement API key".to_string(),
        ))
    }
}

fn require_non_empty(request_id: &str, field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(
            request_id.to_string(),
            format!("'{}' must not be empty", field),
        ));
    }
    Ok(())
}

/// Malformed bodies get the same error envelope as every other failure
fn json_body<T>(request_id: &str, body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(request_id.to_string(), rejection.body_text()))
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
    })
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.services.metrics().to_prometheus_format(),
    )
}

/// POST /api/communities/:community/subjects
pub async fn track_subject_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(community): Path<String>,
    body: Result<Json<TrackSubjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TrackedSubject>), ApiError> {
    let body = json_body(&request_id.0, body)?;
    require_non_empty(&request_id.0, "subject_id", &body.subject_id)?;
    require_non_empty(&request_id.0, "display_name", &body.display_name)?;

    let subject = state
        .services
        .track_subject(&community, &body.subject_id, &body.display_name)
        .map_err(|e| ApiError::from_ledger(request_id.0.clone(), e))?;
    Ok((StatusCode::CREATED, Json(subject)))
}

/// GET /api/communities/:community/subjects
pub async fn list_subjects_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(community): Path<String>,
) -> Result<Json<TrackedSubjectsResponse>, ApiError> {
    let subjects = state
        .services
        .list_tracked_subjects(&community)
        .map_err(|e| ApiError::from_ledger(request_id.0.clone(), e))?;
    Ok(Json(TrackedSubjectsResponse { subjects }))
}

/// DELETE /api/communities/:community/subjects/:subject_id
pub async fn untrack_subject_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((community, subject_id)): Path<(String, String)>,
) -> Result<Json<UntrackResponse>, ApiError> {
    let removed = state
        .services
        .untrack_subject(&community, &subject_id)
        .map_err(|e| ApiError::from_ledger(request_id.0.clone(), e))?;
    Ok(Json(UntrackResponse { removed }))
}

/// POST /api/communities/:community/matches
pub async fn record_match_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(community): Path<String>,
    body: Result<Json<RecordMatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MatchRecord>), ApiError> {
    let body = json_body(&request_id.0, body)?;
    require_non_empty(&request_id.0, "match_id", &body.match_id)?;

    let start = body
        .start_timestamp
        .unwrap_or_else(|| state.services.store().now_ms());
    let record = state
        .services
        .record_active_match(&community, MatchRecord::new(&body.match_id, &body.subject_id, start))
        .map_err(|e| ApiError::from_ledger(request_id.0.clone(), e))?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/communities/:community/subjects/:subject_id/active-match
pub async fn active_match_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((community, subject_id)): Path<(String, String)>,
) -> Result<Json<ActiveMatchResponse>, ApiError> {
    let record = state
        .services
        .get_active_match(&community, &subject_id)
        .map_err(|e| ApiError::from_ledger(request_id.0.clone(), e))?
        .ok_or_else(|| {
            ApiError::from_ledger(
                request_id.0.clone(),
                WagerError::NoActiveMatch {
                    subject_id: subject_id.clone(),
                }
                .into(),
            )
        })?;

    let window = state.services.window();
    let now = state.services.store().now_ms();
    Ok(Json(ActiveMatchResponse {
        window_open: window.is_open(record.start_timestamp, now),
        window_closes_at: window.closes_at(record.start_timestamp),
        record,
    }))
}

/// POST /api/matches/:match_id/finish
pub async fn finish_match_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<FinishMatchRequest>, JsonRejection>,
) -> Result<Json<FinishMatchResponse>, ApiError> {
    validate_settlement_api_key(&state, &headers, &request_id.0)?;
    let body = json_body(&request_id.0, body)?;

    let report = state
        .services
        .on_match_finished(&match_id, body.outcome)
        .map_err(|e| ApiError::from_ledger(request_id.0.clone(), e))?;

    info!(
        request_id = %request_id.0,
        match_id = %match_id,
        outcome = %body.outcome,
        ignored = report.is_none(),
        "Settlement trigger handled"
    );
    Ok(Json(FinishMatchResponse {
        ignored: report.is_none(),
        report,
    }))
}

/// POST /api/communities/:community/wagers
pub async fn place_wager_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(community): Path<String>,
    body: Result<Json<PlaceWagerBody>, JsonRejection>,
) -> Result<Json<WagerReceipt>, ApiError> {
    let body = json_body(&request_id.0, body)?;
    require_non_empty(&request_id.0, "bettor", &body.bettor)?;

    let request = PlaceWagerRequest {
        community,
        bettor: body.bettor,
        subject: body.subject,
        prediction: body.prediction,
        amount: body.amount,
    };
    let receipt = state
        .services
        .place_or_amend(&request)
        .map_err(|e| ApiError::from_ledger(request_id.0.clone(), e))?;
    Ok(Json(receipt))
}

/// GET /api/communities/:community/members/:member
pub async fn account_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((community, member)): Path<(String, String)>,
) -> Result<Json<UserAccount>, ApiError> {
    let account = state
        .services
        .get_account(&community, &member)
        .map_err(|e| ApiError::from_ledger(request_id.0.clone(), e))?;
    Ok(Json(account))
}

/// GET /api/communities/:community/members/:member/progress
pub async fn progress_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path((community, member)): Path<(String, String)>,
) -> Result<Json<ProgressReport>, ApiError> {
    let report = state
        .services
        .get_progress(&community, &member)
        .map_err(|e| ApiError::from_ledger(request_id.0.clone(), e))?;
    Ok(Json(report))
}
