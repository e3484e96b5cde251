//! Error types for Conveyor CI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors (fatal at startup)
    #[error("Unknown worker pool: {0}")]
    UnknownPool(String),

    #[error("Unresolved template property `{property}` in {context}")]
    UnresolvedProperty { property: String, context: String },

    #[error("Invalid branch filter `{pattern}`: {message}")]
    InvalidBranchFilter { pattern: String, message: String },

    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Job errors (contained at the job boundary)
    #[error("Stage {stage} failed with exit code {exit_code}")]
    StageFailed { stage: String, exit_code: i32 },

    #[error("Stage {stage} timed out after {seconds}s")]
    StageTimeout { stage: String, seconds: u64 },

    #[error("No free worker in pool {pool} after {seconds}s")]
    WorkerUnavailable { pool: String, seconds: u64 },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Builder not found: {0}")]
    BuilderNotFound(String),

    #[error("Failed to spawn `{program}`: {message}")]
    Spawn { program: String, message: String },

    // Reporting errors (always swallowed by the reporter)
    #[error("Status report failed: {0}")]
    Reporting(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error belongs to the startup configuration class.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownPool(_)
                | Error::UnresolvedProperty { .. }
                | Error::InvalidBranchFilter { .. }
                | Error::DuplicateName { .. }
                | Error::InvalidConfig(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
