use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::registry::OperationError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest {
        code: &'static str,
        message: String,
    },
    #[error("not found: {message}")]
    NotFound {
        code: &'static str,
        message: String,
        details: Value,
    },
    #[error("internal error")]
    Internal { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Value,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>, details: Value) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
            details,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl From<OperationError> for AppError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::InvalidArguments(message) => {
                Self::bad_request("invalid_arguments", message)
            }
            OperationError::Failed(message) => Self::Internal {
                code: "operation_failed",
                message,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, code, message, json!({}))
            }
            Self::NotFound {
                code,
                message,
                details,
            } => (StatusCode::NOT_FOUND, code, message, details),
            Self::Internal { code, message } => {
                tracing::error!(error = %message, "request failed with internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, code, message, json!({}))
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details,
            }),
        )
            .into_response()
    }
}
