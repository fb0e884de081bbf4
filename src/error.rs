use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use validator::ValidationErrors;

#[derive(Debug, Error)]
pub enum Error {
    /// A limiter policy that can never be enforced, caught at construction time
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    #[error("Validation failed")]
    Validation(#[from] ValidationErrors),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidPolicy(_) | Error::Config(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error envelope shared by every JSON error the API returns.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(rename = "validationErrors", skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<BTreeMap<String, String>>,
    pub success: bool,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            validation_errors: None,
            success: false,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Validation(errors) => Self {
                error: err.to_string(),
                validation_errors: Some(flatten_validation_errors(errors)),
                success: false,
            },
            // Configuration details stay in the logs
            Error::InvalidPolicy(_) | Error::Config(_) | Error::Io(_) => {
                Self::new("Internal server error")
            }
            _ => Self::new(err.to_string()),
        }
    }
}

fn flatten_validation_errors(errors: &ValidationErrors) -> BTreeMap<String, String> {
    errors
        .field_errors()
        .into_iter()
        .filter_map(|(field, errs)| {
            errs.first().map(|e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                (field.to_string(), message)
            })
        })
        .collect()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(target: "api_gate::error", error = %self, "Request failed");
        } else {
            tracing::debug!(target: "api_gate::error", error = %self, "Request rejected");
        }
        (status, Json(ErrorResponse::from_error(&self))).into_response()
    }
}
