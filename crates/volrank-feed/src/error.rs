//! Feed error types.

use thiserror::Error;
use volrank_core::CoreError;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rank tracker is already initialized")]
    AlreadyInitialized,

    #[error("Invalid volume for {symbol}: {value}")]
    InvalidVolume { symbol: String, value: f64 },

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type FeedResult<T> = Result<T, FeedError>;
