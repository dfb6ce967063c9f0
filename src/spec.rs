//! Script documents and the orchestration of a single run.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RunnerConfig;
use crate::error::{ErrorRecord, HarnessError};
use crate::event::{EventRecorder, EventSink};
use crate::normalize::{CanonicalEvent, normalize_events};
use crate::operation::{Operation, OperationKind};
use crate::options::PoolOptions;
use crate::pool::ConnectionPool;
use crate::state::{RunContext, ThreadReport};
use crate::verify::{Mismatch, verify};

/// A pool test script as written on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmapScript {
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pool_options: Map<String, Value>,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub error: Option<ErrorRecord>,
    #[serde(default)]
    pub events: Vec<Map<String, Value>>,
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl CmapScript {
    /// Parse a script from JSON text.
    ///
    /// # Errors
    /// Returns [`HarnessError::Json`] for malformed documents, including any operation whose
    /// `name` is not part of the vocabulary.
    pub fn from_json_str(content: &str) -> Result<Self, HarnessError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Read and parse a script file.
    ///
    /// # Errors
    /// Returns [`HarnessError::Load`] naming the file if it cannot be read or parsed.
    pub fn from_json_path(path: &Path) -> Result<Self, HarnessError> {
        let load_error = |reason: String| HarnessError::Load {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|err| load_error(err.to_string()))?;
        Self::from_json_str(&content).map_err(|err| load_error(err.to_string()))
    }
}

/// Regroup a flat operation list into an execution tree.
///
/// Walking left to right, every `start` takes ownership of all later
/// operations tagged with its target, in their declared order. Whatever is not
/// claimed stays on the main sequence.
#[must_use]
pub fn preprocess(operations: Vec<Operation>) -> Vec<Operation> {
    let mut remaining: VecDeque<Operation> = operations.into();
    let mut processed = Vec::with_capacity(remaining.len());
    while let Some(mut op) = remaining.pop_front() {
        if let OperationKind::Start { target, thread_ops } = &mut op.kind {
            let (claimed, rest): (VecDeque<Operation>, VecDeque<Operation>) = remaining
                .into_iter()
                .partition(|candidate| candidate.thread.as_deref() == Some(target.as_str()));
            thread_ops.extend(claimed);
            remaining = rest;
        }
        processed.push(op);
    }
    processed
}

/// Outcome of [`Spec::run`]: the main sequence's terminal error, if any, and
/// the normalized event trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub error: Option<ErrorRecord>,
    pub events: Vec<CanonicalEvent>,
    /// Reports of background tasks that had finished by the end of the run.
    #[serde(skip)]
    pub threads: Vec<ThreadReport>,
}

impl RunResult {
    /// Errors recorded by the background task `name`, if it was collected.
    #[must_use]
    pub fn thread_errors(&self, name: &str) -> Option<&[ErrorRecord]> {
        self.threads
            .iter()
            .find(|report| report.name == name)
            .map(|report| report.errors.as_slice())
    }

    #[must_use]
    pub fn event_types(&self) -> Vec<&str> {
        self.events
            .iter()
            .map(|event| event.event_type.as_str())
            .collect()
    }
}

/// One test case: its script, the pool built for it, and the events captured.
pub struct Spec<P: ConnectionPool> {
    pub description: String,
    pub pool_options: PoolOptions,
    pub spec_ops: Vec<Operation>,
    pub processed_ops: Vec<Operation>,
    pub expected_error: Option<ErrorRecord>,
    pub expected_events: Vec<Map<String, Value>>,
    pub ignore_events: Vec<String>,
    subscriber: Arc<EventRecorder>,
    pool: Option<Arc<P>>,
    config: RunnerConfig,
    has_run: bool,
}

impl<P: ConnectionPool> std::fmt::Debug for Spec<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spec")
            .field("description", &self.description)
            .field("pool_options", &self.pool_options)
            .field("spec_ops", &self.spec_ops.len())
            .field("has_pool", &self.pool.is_some())
            .field("has_run", &self.has_run)
            .finish_non_exhaustive()
    }
}

impl<P: ConnectionPool> Spec<P> {
    /// Build a spec from a parsed script.
    ///
    /// # Errors
    /// Returns [`HarnessError::Script`] if `poolOptions` carries a malformed value.
    pub fn new(script: CmapScript) -> Result<Self, HarnessError> {
        let pool_options = PoolOptions::from_script(&script.pool_options)?;
        let processed_ops = preprocess(script.operations.clone());
        Ok(Self {
            description: script.description,
            pool_options,
            spec_ops: script.operations,
            processed_ops,
            expected_error: script.error,
            expected_events: script.events,
            ignore_events: script.ignore,
            subscriber: Arc::new(EventRecorder::new()),
            pool: None,
            config: RunnerConfig::default(),
            has_run: false,
        })
    }

    /// Create the pool under test with its own event subscriber.
    ///
    /// # Errors
    /// Propagates the pool's construction error.
    pub fn setup(&mut self, config: &RunnerConfig) -> Result<(), HarnessError> {
        let events: Arc<dyn EventSink> = self.subscriber.clone();
        let pool = P::create(&config.address, self.pool_options.clone(), events)?;
        self.pool = Some(Arc::new(pool));
        self.config = config.clone();
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> Option<&Arc<P>> {
        self.pool.as_ref()
    }

    #[must_use]
    pub fn subscriber(&self) -> &Arc<EventRecorder> {
        &self.subscriber
    }

    /// Execute the main sequence, stopping at the first operation that
    /// reports an error record.
    ///
    /// # Errors
    /// [`HarnessError::SetupRequired`] / [`HarnessError::AlreadyRun`] for lifecycle misuse; any
    /// unexpected failure of a main-sequence operation is propagated as is.
    pub async fn run(&mut self) -> Result<RunResult, HarnessError> {
        if self.has_run {
            return Err(HarnessError::AlreadyRun);
        }
        let pool = self.pool.clone().ok_or(HarnessError::SetupRequired)?;
        self.has_run = true;

        let ctx = Arc::new(RunContext::new(
            pool,
            Arc::clone(&self.subscriber),
            self.config.jitter,
        ));
        let mut error = None;
        for (step, op) in self.processed_ops.iter().enumerate() {
            if step > 0 && !self.config.step_delay.is_zero() {
                tokio::time::sleep(self.config.step_delay).await;
            }
            if let Some(record) = op.run(&ctx, true).await? {
                tracing::debug!(step, op = op.name(), error = %record.error_type, "main sequence stopped");
                error = Some(record);
                break;
            }
        }

        let threads = ctx.state.finish().await;
        let events = normalize_events(&self.subscriber.snapshot(), &self.ignore_events);
        tracing::info!(
            description = %self.description,
            events = events.len(),
            threads = threads.len(),
            error = error.as_ref().map_or("none", |record| record.error_type.as_str()),
            "spec run complete"
        );
        Ok(RunResult {
            error,
            events,
            threads,
        })
    }

    /// Compare a result against this spec's expected error and events.
    ///
    /// # Errors
    /// Returns the first [`Mismatch`] found.
    pub fn verify(&self, result: &RunResult) -> Result<(), Mismatch> {
        verify(self.expected_error.as_ref(), &self.expected_events, result)
    }
}

/// Build, set up, run, and verify one script.
///
/// # Errors
/// Returns [`HarnessError`] if the script cannot be set up or a main-sequence operation fails
/// unexpectedly. A verification failure is reported in the returned tuple, not as an error.
pub async fn run_script<P: ConnectionPool>(
    script: CmapScript,
    config: &RunnerConfig,
) -> Result<(RunResult, Result<(), Mismatch>), HarnessError> {
    let mut spec = Spec::<P>::new(script)?;
    spec.setup(config)?;
    let result = spec.run().await?;
    let verdict = spec.verify(&result);
    Ok((result, verdict))
}
