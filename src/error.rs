// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type shared by the orchestration services and the
/// loopback listener.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("No session could be resolved from the callback")]
    MissingSession,

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Terms of service must be accepted")]
    ConsentRequired,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Duplicate record: {0}")]
    UniqueViolation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Provider detail for a refresh grant the provider refused.
    pub const REFRESH_REJECTED: &'static str = "Refresh token rejected";

    /// True when the provider refused the refresh grant itself, as opposed to
    /// failing to answer.
    pub fn is_refresh_rejected(&self) -> bool {
        matches!(self, AppError::Provider(msg) if msg == Self::REFRESH_REJECTED)
    }

    /// Network or backend failures the user can recover from by retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Provider(_) | AppError::Database(_))
    }

    /// True when an insert lost a uniqueness race.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, AppError::UniqueViolation(_))
    }

    /// Short message suitable for an error screen.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized | AppError::MissingSession => {
                "Sign-in could not be completed. Please log in again.".to_string()
            }
            AppError::AuthRejected(reason) => {
                format!("Sign-in was cancelled or rejected ({}). Please log in again.", reason)
            }
            AppError::ConsentRequired => {
                "Please accept the terms of service to continue.".to_string()
            }
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Provider(_) | AppError::Database(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            AppError::UniqueViolation(_) => "That name is already taken.".to_string(),
            AppError::Internal(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::MissingSession => (StatusCode::UNAUTHORIZED, "missing_session", None),
            AppError::AuthRejected(msg) => {
                (StatusCode::UNAUTHORIZED, "auth_rejected", Some(msg.clone()))
            }
            AppError::ConsentRequired => (StatusCode::FORBIDDEN, "consent_required", None),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::UniqueViolation(msg) => {
                (StatusCode::CONFLICT, "conflict", Some(msg.clone()))
            }
            AppError::Provider(msg) => {
                tracing::warn!(error = %msg, "Identity provider error");
                (StatusCode::BAD_GATEWAY, "provider_error", None)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::BAD_GATEWAY, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for services and handlers
pub type Result<T> = std::result::Result<T, AppError>;
