use http::StatusCode;
use spin_sdk::http::Response;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid username or password.")]
    Auth,

    #[error("{0}")]
    NotFound(String),

    #[error("Password reset token is invalid or has expired.")]
    Token,

    #[error(transparent)]
    Server(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Token => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Auth => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client. Server errors stay opaque.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Server(_) => "Server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        if let ApiError::Server(inner) = &err {
            error!(error = ?inner, "request failed");
        }
        let body = serde_json::json!({ "message": err.public_message() });
        Response::builder()
            .status(err.status().as_u16())
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(&body).unwrap_or_default())
            .build()
    }
}
