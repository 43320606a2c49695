//! REST error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    /// Non-2xx response. `body` is the parsed JSON error body, or the raw
    /// text wrapped in a JSON string when it is not JSON.
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        body: serde_json::Value,
    },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API credentials required for {0}")]
    MissingCredentials(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RestError {
    /// HTTP status of a rejected request, if that is what this is.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type RestResult<T> = Result<T, RestError>;
