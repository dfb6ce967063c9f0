//! Convenient imports for common functionality.
//!
//! This module re-exports the types most script runners need.

pub use crate::config::{RunnerConfig, RunnerConfigBuilder};
pub use crate::error::{ErrorRecord, HarnessError};
pub use crate::event::{EventRecorder, EventSink, PoolEvent};
pub use crate::loader::load_scripts;
pub use crate::normalize::CanonicalEvent;
pub use crate::operation::{Operation, OperationKind};
pub use crate::options::PoolOptions;
pub use crate::pool::{ConnectionPool, MemoryPool, PoolError};
pub use crate::spec::{CmapScript, RunResult, Spec, run_script};
pub use crate::verify::Mismatch;
