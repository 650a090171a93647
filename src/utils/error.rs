// =============================================================================
// Matrixon Matrix NextServer - Error Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Error taxonomy shared by the sync and federation paths. Every variant maps
// to exactly one HTTP status and Matrix `errcode`, so callers can tell
// "you may not" (403) apart from "it does not exist" (404).
//
// =============================================================================

use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Matrixon global error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Bad JSON: {0}")]
    BadJson(String),

    #[error("Not JSON: {0}")]
    NotJson(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    BadConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Matrixon global result type
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Logs and wraps an inconsistency found in storage.
    pub fn bad_database(message: impl Into<String>) -> Self {
        let message = message.into();
        error!("❌ BadDatabase: {}", message);
        Self::Database(message)
    }

    pub fn bad_config(message: impl Into<String>) -> Self {
        let message = message.into();
        error!("❌ BadConfig: {}", message);
        Self::BadConfig(message)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::BadJson(_) | Self::NotJson(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Cancelled
            | Self::Internal(_)
            | Self::Database(_)
            | Self::BadConfig(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The Matrix `errcode` sent to the remote side.
    pub fn errcode(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "M_INVALID_PARAM",
            Self::BadJson(_) => "M_BAD_JSON",
            Self::NotJson(_) => "M_NOT_JSON",
            Self::Unauthorized(_) => "M_MISSING_TOKEN",
            Self::Forbidden(_) => "M_FORBIDDEN",
            Self::NotFound(_) => "M_NOT_FOUND",
            _ => "M_UNKNOWN",
        }
    }

    /// Message safe to expose to clients. Server side details stay in the logs.
    fn client_message(&self) -> String {
        match self {
            Self::BadRequest(m)
            | Self::BadJson(m)
            | Self::NotJson(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m) => m.clone(),
            Self::Cancelled => "Request cancelled".to_owned(),
            _ => "Internal server error".to_owned(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("❌ Request failed: {}", self);
        } else {
            warn!("⚠️ Request rejected ({}): {}", status, self);
        }

        let body = Json(json!({
            "errcode": self.errcode(),
            "error": self.client_message(),
        }));
        (status, body).into_response()
    }
}
