//! Declarative connection-pool test engine.
//!
//! A script names pool operations (`checkOut`, `checkIn`, `clear`, `close`,
//! ...), some of them tagged to run on named background tasks. [`Spec`]
//! regroups those per task, drives a [`ConnectionPool`] through them with real
//! concurrency, and reduces the pool's lifecycle events to canonical records
//! that can be compared against the script's expected trace.
//!
//! ```rust,no_run
//! use cmap_runner::prelude::*;
//!
//! # async fn demo() -> Result<(), HarnessError> {
//! let script = CmapScript::from_json_str(
//!     r#"{ "poolOptions": { "maxPoolSize": 1 }, "operations": [{ "name": "checkOut" }] }"#,
//! )?;
//! let mut spec = Spec::<MemoryPool>::new(script)?;
//! spec.setup(&RunnerConfig::default())?;
//! let result = spec.run().await?;
//! assert!(result.error.is_none());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod loader;
pub mod normalize;
pub mod operation;
pub mod options;
pub mod pool;
pub mod prelude;
pub mod spec;
pub mod state;
pub mod verify;

pub use config::{Jitter, RunnerConfig, RunnerConfigBuilder};
pub use error::{ErrorRecord, HarnessError};
pub use event::{CheckOutFailedReason, ConnectionClosedReason, EventRecorder, EventSink, PoolEvent};
pub use normalize::{CanonicalEvent, normalize_event, normalize_events};
pub use operation::{Operation, OperationKind};
pub use options::PoolOptions;
pub use pool::{ConnectionPool, MemoryConnection, MemoryPool, PoolError};
pub use spec::{CmapScript, RunResult, Spec, preprocess, run_script};
pub use state::ThreadReport;
pub use verify::{Mismatch, verify};
