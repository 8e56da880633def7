use thiserror::Error;

use crate::core::validation::ValidationError;

/// Why a single record of a batch failed. The batch itself carries on.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("rejected {path}: {source}")]
    Validation {
        path: String,
        #[source]
        source: ValidationError,
    },
    #[error("no fund URL and no bank in the file name of {path}")]
    Identity { path: String },
    #[error("persistence failed for {path}: {message}")]
    Persistence { path: String, message: String },
    #[error("worker for {path} stopped unexpectedly: {message}")]
    Worker { path: String, message: String },
}

impl RecordError {
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::Read { .. } => "read",
            RecordError::Parse { .. } => "parse",
            RecordError::Validation { .. } => "validation",
            RecordError::Identity { .. } => "identity",
            RecordError::Persistence { .. } => "persistence",
            RecordError::Worker { .. } => "worker",
        }
    }

    pub fn persistence(path: &str, error: &anyhow::Error) -> Self {
        RecordError::Persistence {
            path: path.to_string(),
            message: format!("{error:#}"),
        }
    }
}
