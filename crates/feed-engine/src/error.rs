//! Error types for the feed engine.
//!
//! Nothing here is fatal on the control path: `LoadError` becomes a handle's
//! `Error` status and `FetchError` becomes a logged no-op.  Only bootstrap
//! and setup surface `EngineError` to the caller.

use thiserror::Error;

/// A player resource failed to bind or buffer a locator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("unsupported locator: {0}")]
    Unsupported(String),

    #[error("failed to load {locator}: {reason}")]
    Failed { locator: String, reason: String },
}

/// A pagination (or initial list) request failed.  The feed stays unchanged.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("feed endpoint returned HTTP {0}")]
    Status(u16),

    #[error("invalid feed page: {0}")]
    Parse(String),

    /// The source has no more items to hand out.
    #[error("feed source exhausted")]
    Exhausted,
}

/// Setup-time failures.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("initial feed load failed: {0}")]
    Bootstrap(#[from] FetchError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
