// src/error.rs
//
// Error taxonomy for the simulation core.
// - Config:     bad or missing keys, out-of-range parameters (fail fast)
// - Logic:      illegal category transitions, disallowed actions, model bugs
// - Io / Parse: file problems, always with the offending path attached
// - Validation: sample records violating their invariants
// - Worker:     a parallel worker panicked
//
// Nothing in the core retries; callers decide what to do.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("logic error: {0}")]
    Logic(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("worker {worker} failed: {message}")]
    Worker { worker: usize, message: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        EngineError::Logic(msg.into())
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn parse(path: impl AsRef<Path>, message: impl ToString) -> Self {
        EngineError::Parse {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for errors that indicate a bug in a model or in calling code.
    pub fn is_logic(&self) -> bool {
        matches!(self, EngineError::Logic(_))
    }
}
