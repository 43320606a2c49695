//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure to obtain the initial session or volume snapshot.
    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<volrank_ws::WsError>),

    #[error("REST error: {0}")]
    Rest(#[from] volrank_rest::RestError),

    #[error("Feed error: {0}")]
    Feed(#[from] volrank_feed::FeedError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] volrank_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<volrank_ws::WsError> for AppError {
    fn from(e: volrank_ws::WsError) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
