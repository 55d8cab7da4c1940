//! HTTP-facing error taxonomy.
//!
//! Validation and authorization failures carry a message that is safe to show
//! the caller. Upstream failures are logged with their full cause and answered
//! with a generic message only.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Upstream {
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn unauthorized() -> Self {
        AppError::Unauthorized("Unauthorized".into())
    }

    /// Builds a `map_err` adapter that wraps any failure as `Upstream` with the
    /// given client-facing message.
    pub fn upstream<E>(message: &'static str) -> impl FnOnce(E) -> AppError
    where
        E: Into<anyhow::Error>,
    {
        move |e| AppError::Upstream {
            message,
            source: e.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            // duplicate registration is reported as a plain bad request
            AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Upstream {
            message: "Internal server error",
            source: e.into(),
        }
    }
}

/// Malformed or mistyped JSON bodies are validation failures. The parser's
/// own text stays in the log.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(status = %rejection.status(), detail = %rejection.body_text(), "request body rejected");
        AppError::Validation("Invalid request body".into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Upstream { message, source } = &self {
            tracing::error!(error = ?source, "{}", message);
        }
        (self.status(), self.to_string()).into_response()
    }
}
