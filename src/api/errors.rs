//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request tracking.

use crate::errors::{BingoError, ConflictError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

/// Error body with structured information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code (NOT_FOUND, BAD_REQUEST, CARD_TAKEN, etc.)
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// API error types with request tracking
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    /// Lost a race; `code` tells the client which one
    Conflict { code: &'static str, message: String },
    InternalError(String),
}

impl ApiError {
    pub fn bad_request(request_id: String, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message.into()),
            request_id,
        }
    }

    pub fn unauthorized(request_id: String, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized(message.into()),
            request_id,
        }
    }

    pub fn internal_error(request_id: String, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::InternalError(message.into()),
            request_id,
        }
    }

    /// Map a core error onto its HTTP shape; storage details stay in the log
    pub fn from_bingo(request_id: String, err: BingoError) -> Self {
        let kind = match err {
            BingoError::Validation(e) => ApiErrorKind::BadRequest(e.to_string()),
            BingoError::Conflict(e) => ApiErrorKind::Conflict {
                code: conflict_code(&e),
                message: e.to_string(),
            },
            BingoError::Unauthenticated => ApiErrorKind::Unauthorized("invalid player id or session token".to_string()),
            BingoError::Forbidden(msg) => ApiErrorKind::Forbidden(msg),
            BingoError::NotFound(what) => ApiErrorKind::NotFound(format!("{} not found", what)),
            e @ (BingoError::Storage(_) | BingoError::Configuration(_)) => {
                error!(request_id = %request_id, error = %e, "request failed");
                ApiErrorKind::InternalError("internal error, please retry".to_string())
            }
        };
        Self { kind, request_id }
    }
}

fn conflict_code(e: &ConflictError) -> &'static str {
    match e {
        ConflictError::CardTaken(_) => "CARD_TAKEN",
        ConflictError::CardBeingViewed { .. } => "CARD_BEING_VIEWED",
        ConflictError::RoundClosed { .. } => "ROUND_CLOSED",
        ConflictError::RoundAlreadyLive(_) => "ROUND_ALREADY_LIVE",
        ConflictError::AlreadyStarting(_) => "ALREADY_STARTING",
        ConflictError::SettlementInProgress(_) => "SETTLEMENT_IN_PROGRESS",
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
            ApiErrorKind::Unauthorized(msg) => write!(f, "[{}] Unauthorized: {}", self.request_id, msg),
            ApiErrorKind::Forbidden(msg) => write!(f, "[{}] Forbidden: {}", self.request_id, msg),
            ApiErrorKind::NotFound(msg) => write!(f, "[{}] Not Found: {}", self.request_id, msg),
            ApiErrorKind::Conflict { code, message } => write!(f, "[{}] {}: {}", self.request_id, code, message),
            ApiErrorKind::InternalError(msg) => write!(f, "[{}] Internal Error: {}", self.request_id, msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self.kind {
            ApiErrorKind::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiErrorKind::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiErrorKind::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiErrorKind::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiErrorKind::Conflict { code, message } => (StatusCode::CONFLICT, code, message),
            ApiErrorKind::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
