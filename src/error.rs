use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pool::PoolError;

/// Errors raised by the engine itself, as opposed to canonical error records
/// that a script run reports back to its caller.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Script error: {0}")]
    Script(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("No thread named {0:?} has been started")]
    UnknownThread(String),

    #[error("Thread {thread:?} panicked: {message}")]
    ThreadPanicked { thread: String, message: String },

    #[error("Failed to load script {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("Spec::setup must be called before Spec::run")]
    SetupRequired,

    #[error("Spec has already been run")]
    AlreadyRun,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Short class name used when a background task has to report this error
    /// as a record instead of propagating it.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            HarnessError::Script(_) => "ScriptError",
            HarnessError::Pool(err) => err.error_type(),
            HarnessError::UnknownThread(_) => "UnknownThreadError",
            HarnessError::ThreadPanicked { .. } => "ThreadPanickedError",
            HarnessError::Load { .. } => "LoadError",
            HarnessError::SetupRequired | HarnessError::AlreadyRun => "LifecycleError",
            HarnessError::Io(_) => "IoError",
            HarnessError::Json(_) => "JsonError",
        }
    }
}

const POOL_CLOSED_MESSAGE: &str = "Attempted to check out a connection from closed connection pool";
const WAIT_QUEUE_TIMEOUT_MESSAGE: &str =
    "Timed out while checking out a connection from connection pool";

/// Canonical error document, comparable with a script's `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error_type: error_type.to_string(),
            message: message.to_string(),
        }
    }

    /// Canonical record for the two pool failures scripts can expect, `None` for anything else.
    ///
    /// The message is the fixed CMAP wording rather than the pool's own text.
    #[must_use]
    pub fn expected_pool_error(err: &PoolError) -> Option<Self> {
        match err {
            PoolError::Closed { .. } => Some(Self::new(err.error_type(), POOL_CLOSED_MESSAGE)),
            PoolError::WaitQueueTimeout { .. } => {
                Some(Self::new(err.error_type(), WAIT_QUEUE_TIMEOUT_MESSAGE))
            }
            PoolError::Connection(_) | PoolError::Unsupported(_) => None,
        }
    }
}

impl From<&HarnessError> for ErrorRecord {
    fn from(err: &HarnessError) -> Self {
        if let HarnessError::Pool(pool_err) = err {
            if let Some(record) = ErrorRecord::expected_pool_error(pool_err) {
                return record;
            }
        }
        ErrorRecord::new(err.error_type(), &err.to_string())
    }
}
