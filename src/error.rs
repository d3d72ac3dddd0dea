//! Unified error handling for the payment backend.
//!
//! Maps the reconciliation taxonomy (invalid input, invalid signature,
//! not found, gateway failure, internal) onto HTTP status codes and a
//! consistent JSON error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::error::DatabaseError;
use crate::gateway::error::GatewayError;

/// Machine-readable error codes for client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    /// Missing or malformed request fields. `missing_fields` names every
    /// absent field so the caller can correct the request in one pass.
    InvalidInput {
        message: String,
        missing_fields: Vec<String>,
    },
    /// Signature verification failed. Security-relevant; logged prominently.
    InvalidSignature { context: String },
    /// Referenced order or payment record does not exist.
    NotFound { entity: String, id: String },
    /// A transition out of a terminal payment state was requested.
    InvalidState { message: String },
    /// Upstream gateway failure; carries the upstream description.
    Gateway {
        message: String,
        retryable: bool,
    },
    /// Unexpected internal failure.
    Internal { message: String },
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self { kind }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::InvalidInput {
            message: message.into(),
            missing_fields: Vec::new(),
        })
    }

    pub fn missing_fields(fields: Vec<String>) -> Self {
        Self::new(AppErrorKind::InvalidInput {
            message: format!("Missing required fields: {}", fields.join(", ")),
            missing_fields: fields,
        })
    }

    pub fn invalid_signature(context: impl Into<String>) -> Self {
        Self::new(AppErrorKind::InvalidSignature {
            context: context.into(),
        })
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::InvalidState {
            message: message.into(),
        })
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Internal {
            message: message.into(),
        })
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::InvalidInput { .. } => 400,
            AppErrorKind::InvalidSignature { .. } => 400,
            AppErrorKind::NotFound { .. } => 404,
            AppErrorKind::InvalidState { .. } => 409,
            AppErrorKind::Gateway { .. } => 502,
            AppErrorKind::Internal { .. } => 500,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::InvalidInput { .. } => ErrorCode::InvalidInput,
            AppErrorKind::InvalidSignature { .. } => ErrorCode::InvalidSignature,
            AppErrorKind::NotFound { .. } => ErrorCode::NotFound,
            AppErrorKind::InvalidState { .. } => ErrorCode::InvalidState,
            AppErrorKind::Gateway { .. } => ErrorCode::GatewayError,
            AppErrorKind::Internal { .. } => ErrorCode::InternalError,
        }
    }

    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::InvalidInput { message, .. } => message.clone(),
            AppErrorKind::InvalidSignature { .. } => "Invalid payment signature".to_string(),
            AppErrorKind::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
            AppErrorKind::InvalidState { message } => message.clone(),
            AppErrorKind::Gateway { message, .. } => {
                format!("Payment gateway error: {}", message)
            }
            AppErrorKind::Internal { .. } => {
                "An internal server error occurred. Please try again later".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Gateway { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn is_signature_rejection(&self) -> bool {
        matches!(self.kind, AppErrorKind::InvalidSignature { .. })
    }

    fn details(&self) -> Option<serde_json::Value> {
        match &self.kind {
            AppErrorKind::InvalidInput { missing_fields, .. } if !missing_fields.is_empty() => {
                Some(serde_json::json!({ "missing_fields": missing_fields }))
            }
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::ValidationError { message, .. } => AppError::invalid_input(message),
            GatewayError::InvalidSignature { message } => AppError::invalid_signature(message),
            other => AppError::new(AppErrorKind::Gateway {
                message: other.user_message(),
                retryable: other.is_retryable(),
            }),
        }
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::database::error::DatabaseErrorKind;
        match err.kind {
            DatabaseErrorKind::NotFound { entity, id } => AppError::not_found(entity, id),
            other => AppError::internal(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Standardized error response structure returned to clients for all error
/// cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorCode,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            success: false,
            error: error.error_code(),
            message: error.user_message(),
            timestamp: Utc::now().to_rfc3339(),
            details: error.details(),
            retryable: Some(error.is_retryable()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(error = ?self, status = %status_code.as_u16(), "server error");
        } else if matches!(self.kind, AppErrorKind::InvalidSignature { .. }) {
            // Failed signature checks are the one client error worth alerting on.
            tracing::error!(error = ?self, "signature verification rejected");
        } else {
            tracing::warn!(error = ?self, status = %status_code.as_u16(), "client error");
        }

        let error_response = ErrorResponse::from_app_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

/// Standardized success envelope for API handlers.
pub fn success_response<T: Serialize>(data: T, message: Option<&str>) -> impl IntoResponse {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "message": message,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
