use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::ledger::models::OperationType;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Payment network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Reconciliation inconsistency for campaign {campaign_id} ({operation} op, hash {hash}): {detail}")]
    ReconciliationInconsistency {
        campaign_id: i64,
        operation: OperationType,
        hash: String,
        detail: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg,
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg,
                None,
            ),
            AppError::NetworkUnavailable(msg) => (
                StatusCode::BAD_GATEWAY,
                "NETWORK_UNAVAILABLE",
                format!("Payment network unavailable: {}", msg),
                None,
            ),
            AppError::ReconciliationInconsistency {
                campaign_id,
                operation,
                hash,
                detail,
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "RECONCILIATION_INCONSISTENCY",
                format!(
                    "Reconciliation inconsistency for campaign {}: {}",
                    campaign_id, detail
                ),
                Some(serde_json::json!({
                    "campaign_id": campaign_id,
                    "operation": operation,
                    "confirmation_hash": hash,
                })),
            ),
            AppError::Persistence(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            AppError::NetworkUnavailable("request timed out".to_string())
        } else {
            AppError::NetworkUnavailable(format!("{}", error))
        }
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
