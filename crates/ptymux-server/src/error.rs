use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use ptymux_types::PtyError;
use thiserror::Error;
use tracing::error;

/// Error type returned by every handler
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("{0}")]
    BadRequest(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("invalid JSON body: {}", err))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Pty(err) => match err {
                PtyError::Validation(_) | PtyError::Spawn { .. } => StatusCode::BAD_REQUEST,
                PtyError::NotFound { .. } => StatusCode::NOT_FOUND,
                PtyError::NotRunning(_) => StatusCode::CONFLICT,
                PtyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Pty(err) => err.kind(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self);
        }

        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
