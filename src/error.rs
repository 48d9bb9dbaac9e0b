//! Crate-level error type
//!
//! Everything surfaced by the public API funnels into [`Error`]. Storage
//! failures wrap diesel errors; domain rule violations get their own
//! variants so callers can branch on them.

use thiserror::Error;

/// Errors produced by the conversation routing core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("card {0} not found")]
    CardNotFound(String),

    #[error("invalid {field}: {value}")]
    Validation { field: &'static str, value: String },

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
