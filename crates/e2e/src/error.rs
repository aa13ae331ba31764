//! Error types for fixture handling

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Fixture not found: {0}")]
    FixtureNotFound(String),

    #[error("Fixture parse error: {0}")]
    FixtureParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
