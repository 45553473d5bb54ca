//! Request failure type shared by the gateway and the models.

use thiserror::Error;

/// Why a request to the player service did not produce a value.
///
/// `Clone` so the same failure can be reported both as a generic and as a
/// field-scoped model event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// The request never got a response (connection refused, reset, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response without a structured error body.
    #[error("{status}: {text}")]
    Status { status: u16, text: String },

    /// Non-2xx response carrying `{"error": ..., "data": {"index": ...}}`.
    /// `index` points at the offending rule/row for validation failures.
    #[error("{message}")]
    Server {
        status: u16,
        message: String,
        index: Option<usize>,
    },

    /// The response body was not the JSON shape we expected.
    #[error("could not decode response: {0}")]
    Decode(String),

    /// Superseded by a newer request before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// Local input rejected before anything was sent.
    #[error("invalid input {input:?}: {reason}")]
    Parse { input: String, reason: String },
}

impl ApiError {
    /// HTTP status of the failed response, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } | ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Rule/row index attached to a server-side validation error.
    pub fn index(&self) -> Option<usize> {
        match self {
            ApiError::Server { index, .. } => *index,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}
