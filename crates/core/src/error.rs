use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("invalid direction {0:?}: expected \"right\" or \"below\"")]
    InvalidDirection(String),
    #[error("invalid mean policy: {0}")]
    InvalidMeanPolicy(String),
    #[error("extraction schema for label {0:?} has no fields")]
    EmptySchema(String),
    #[error("failed to persist calibration memory to {path:?}: {message}")]
    Persist { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure of the external field extractor. Always recoverable: the controller
/// logs it and falls back to geometry.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extractor request failed: {0}")]
    Upstream(String),
    #[error("extractor timed out after {0:?}")]
    Timeout(Duration),
    #[error("extractor response rejected: {0}")]
    Parse(#[from] ResponseParseError),
}

#[derive(Error, Debug)]
pub enum ResponseParseError {
    #[error("response is not valid JSON ({source}); response starts with {snippet:?}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
        snippet: String,
    },
    #[error("response must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("field {field:?}: {reason}")]
    InvalidField { field: String, reason: String },
}
