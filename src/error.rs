use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Browser automation error: {0}")]
    BrowserError(String),

    #[error("LLM provider error: {0}")]
    LlmError(String),

    #[error("Invalid request: {0}")]
    ValidationError(String),

    #[error("Recording error: {0}")]
    RecordingError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::ScriptNotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            AppError::BrowserError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Browser Error"),
            AppError::LlmError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "LLM Error"),
            AppError::RecordingError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Recording Error"),
            AppError::QueueError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Queue Error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error"),
        };

        let body = Json(ErrorResponse {
            error: error_message.to_string(),
            detail: self.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// How a failed browser call should be treated by the retry pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Timeouts and wait-state expiry. Retried; usually transient.
    Temporal,
    /// The selector resolved to nothing. Not retryable as-is; AI fallback applies.
    Structural,
    /// Network-level failures. Retried; AI cannot help.
    Connectivity,
    /// The element exists but refused the interaction. AI fallback applies.
    Interaction,
    /// Rejected before execution: missing variable, malformed URL.
    Validation,
    /// Control-flow noise, e.g. `stop` on an empty queue.
    Control,
}

impl ErrorKind {
    /// Classify a raw driver error message into the taxonomy.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("selector not found")
            || msg.contains("no element")
            || msg.contains("element not found")
            || msg.contains("locator")
        {
            ErrorKind::Structural
        } else if msg.contains("click failed")
            || msg.contains("not interactable")
            || msg.contains("not clickable")
        {
            ErrorKind::Interaction
        } else if msg.contains("network")
            || msg.contains("connection")
            || msg.contains("failed to load")
            || msg.contains("net::")
        {
            ErrorKind::Connectivity
        } else if msg.contains("timeout") || msg.contains("timed out") || msg.contains("waiting") {
            ErrorKind::Temporal
        } else {
            // Unknown failures get the retry treatment.
            ErrorKind::Temporal
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Temporal | ErrorKind::Connectivity)
    }

    /// Whether the AI fallback runs after the retry sequence is exhausted.
    pub fn wants_fallback(&self) -> bool {
        matches!(self, ErrorKind::Structural | ErrorKind::Interaction)
    }
}

/// Failure surfaced by the executor to the queue.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Human-readable description of the failed action, already redacted.
    pub action: String,
    pub attempt: u32,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            action: action.into(),
            attempt: 0,
        }
    }

    pub fn classified(message: impl Into<String>, action: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify(&message),
            message,
            action: action.into(),
            attempt: 0,
        }
    }

    pub fn validation(message: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, action)
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}
