use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use config::ConfigError;
use thiserror::Error;

/// Field name → validation messages, in the shape a filter form reports them
pub type FormErrors = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Validation {
        message: String,
        form_errors: FormErrors,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::error::Error),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) | AppError::Http(_) => StatusCode::BAD_GATEWAY,
            AppError::JsonError(_)
            | AppError::Io(_)
            | AppError::Internal(_)
            | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            AppError::Validation {
                message,
                form_errors,
            } => serde_json::json!({
                "status": false,
                "error": message,
                "form_errors": form_errors,
            }),
            other => serde_json::json!({
                "status": false,
                "error": other.to_string(),
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}
