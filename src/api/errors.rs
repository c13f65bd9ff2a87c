//! API Error Handling
//!
//! Every failure leaves the server as `{request_id, error: {code, message}}`
//! with a status derived from the ledger error kind.

use crate::errors::{LedgerError, WagerError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code (WINDOW_CLOSED, STORE_UNAVAILABLE, ...)
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    BadRequest(String),
    Unauthorized(String),
    Rejected(WagerError),
    StoreUnavailable(String),
    InternalError(String),
}

impl ApiError {
    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn unauthorized(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized(message),
            request_id,
        }
    }

    /// Classify a ledger failure for the wire
    pub fn from_ledger(request_id: String, err: LedgerError) -> Self {
        let kind = match err {
            LedgerError::Wager(rejection) => ApiErrorKind::Rejected(rejection),
            LedgerError::Storage(e) => {
                error!(request_id = %request_id, error = %e, "Ledger store failure");
                ApiErrorKind::StoreUnavailable(e.to_string())
            }
            LedgerError::Configuration(e) => ApiErrorKind::InternalError(e.to_string()),
        };
        Self { kind, request_id }
    }
}

fn rejection_status(rejection: &WagerError) -> StatusCode {
    match rejection {
        WagerError::UnknownSubject(_) | WagerError::NoTrackedSubjects | WagerError::UnknownMatch(_) => {
            StatusCode::NOT_FOUND
        }
        WagerError::AmbiguousSubject { .. } | WagerError::InvalidAmount => StatusCode::BAD_REQUEST,
        WagerError::NoActiveMatch { .. }
        | WagerError::WindowClosed { .. }
        | WagerError::DuplicateSettlement { .. } => StatusCode::CONFLICT,
        WagerError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn rejection_details(rejection: &WagerError) -> Option<serde_json::Value> {
    match rejection {
        WagerError::InsufficientFunds { available, requested } => Some(serde_json::json!({
            "available": available,
            "requested": requested,
        })),
        WagerError::AmbiguousSubject { candidates } => Some(serde_json::json!({ "candidates": candidates })),
        _ => None,
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
            ApiErrorKind::Unauthorized(msg) => write!(f, "[{}] Unauthorized: {}", self.request_id, msg),
            ApiErrorKind::Rejected(e) => write!(f, "[{}] Rejected: {}", self.request_id, e),
            ApiErrorKind::StoreUnavailable(msg) => write!(f, "[{}] Store Unavailable: {}", self.request_id, msg),
            ApiErrorKind::InternalError(msg) => write!(f, "[{}] Internal Error: {}", self.request_id, msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self.kind {
            ApiErrorKind::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
            ApiErrorKind::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone(), None),
            ApiErrorKind::Rejected(rejection) => (
                rejection_status(rejection),
                rejection.code(),
                rejection.to_string(),
                rejection_details(rejection),
            ),
            // Storage detail stays in the logs
            ApiErrorKind::StoreUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "The ledger store is temporarily unavailable".to_string(),
                None,
            ),
            ApiErrorKind::InternalError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone(), None)
            }
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StorageError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (WagerError::WindowClosed { match_id: "m".into() }, StatusCode::CONFLICT),
            (
                WagerError::InsufficientFunds {
                    available: 1,
                    requested: 2,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (WagerError::UnknownSubject("x".into()), StatusCode::NOT_FOUND),
            (WagerError::InvalidAmount, StatusCode::BAD_REQUEST),
        ];
        for (rejection, status) in cases {
            let response = ApiError::from_ledger("r".into(), rejection.into()).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn test_storage_errors_are_unavailable() {
        let err = ApiError::from_ledger("r".into(), StorageError::WriteFailed("disk full".into()).into());
        assert!(matches!(err.kind, ApiErrorKind::StoreUnavailable(_)));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
