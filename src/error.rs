//! Error taxonomy shared by every pipeline stage.
//!
//! Recoverable conditions (a missing classification, an empty epoch set) are
//! not errors: stages log them and carry on. Everything here stops the
//! current recording.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("channel count mismatch: {labels} labels for {rows} data rows")]
    ChannelMismatch { labels: usize, rows: usize },

    #[error("cannot infer condition category from {0}")]
    UnknownCategory(String),

    #[error("source separation failed: {0}")]
    Decomposition(String),

    #[error("malformed recording container: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
