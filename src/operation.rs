//! Script operations and their execution against the pool under test.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ErrorRecord, HarnessError};
use crate::pool::ConnectionPool;
use crate::state::{RunContext, ThreadReport};

/// Boxed so that `start` can spawn tasks that themselves run operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of running one operation: `None` on success, a canonical record for
/// a recognized failure.
pub type OperationOutcome = Result<Option<ErrorRecord>, HarnessError>;

/// One entry of a script's `operations` list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Operation {
    /// Named background task this operation belongs to; `None` runs on the main task.
    #[serde(default)]
    pub thread: Option<String>,
    #[serde(flatten)]
    pub kind: OperationKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name")]
pub enum OperationKind {
    /// Spawn the task `target`, which runs `thread_ops` in order.
    #[serde(rename = "start")]
    Start {
        target: String,
        /// Filled in by preprocessing, never read from the script.
        #[serde(skip)]
        thread_ops: Vec<Operation>,
    },
    #[serde(rename = "wait")]
    Wait { ms: u64 },
    #[serde(rename = "waitFor", alias = "waitForThread")]
    WaitFor { target: String },
    #[serde(rename = "waitForEvent")]
    WaitForEvent { event: String, count: usize },
    #[serde(rename = "checkOut")]
    CheckOut {
        #[serde(default)]
        label: Option<String>,
    },
    #[serde(rename = "checkIn")]
    CheckIn { connection: String },
    #[serde(rename = "clear")]
    Clear,
    #[serde(rename = "close")]
    Close,
}

impl Operation {
    #[must_use]
    pub fn new(kind: OperationKind) -> Self {
        Self { thread: None, kind }
    }

    #[must_use]
    pub fn on_thread(mut self, thread: &str) -> Self {
        self.thread = Some(thread.to_string());
        self
    }

    /// Script name of this operation.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self.kind {
            OperationKind::Start { .. } => "start",
            OperationKind::Wait { .. } => "wait",
            OperationKind::WaitFor { .. } => "waitFor",
            OperationKind::WaitForEvent { .. } => "waitForEvent",
            OperationKind::CheckOut { .. } => "checkOut",
            OperationKind::CheckIn { .. } => "checkIn",
            OperationKind::Clear => "clear",
            OperationKind::Close => "close",
        }
    }

    /// Task name a `start` operation spawns.
    #[must_use]
    pub fn start_target(&self) -> Option<&str> {
        match &self.kind {
            OperationKind::Start { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Operations owned by a `start`; empty for every other kind.
    #[must_use]
    pub fn thread_ops(&self) -> &[Operation] {
        match &self.kind {
            OperationKind::Start { thread_ops, .. } => thread_ops,
            _ => &[],
        }
    }

    /// Run this operation.
    ///
    /// Pool-closed and wait-queue-timeout failures come back as `Ok(Some(record))`.
    /// Any other failure is returned as `Err` on the main task; on a background task
    /// (`main_thread == false`) it is folded into a record instead, since nothing
    /// upstream of a spawned task could handle it.
    ///
    /// # Errors
    /// Returns [`HarnessError`] for unexpected failures on the main task.
    pub fn run<'a, P: ConnectionPool>(
        &'a self,
        ctx: &'a Arc<RunContext<P>>,
        main_thread: bool,
    ) -> BoxFuture<'a, OperationOutcome> {
        Box::pin(async move {
            tracing::debug!(
                op = self.name(),
                thread = self.thread.as_deref().unwrap_or("main"),
                "running operation"
            );
            let err = match self.execute(ctx).await {
                Ok(()) => return Ok(None),
                Err(err) => err,
            };
            if let HarnessError::Pool(pool_err) = &err {
                if let Some(record) = ErrorRecord::expected_pool_error(pool_err) {
                    return Ok(Some(record));
                }
            }
            if main_thread {
                Err(err)
            } else {
                tracing::debug!(op = self.name(), error = %err, "background operation failed");
                Ok(Some(ErrorRecord::from(&err)))
            }
        })
    }

    async fn execute<P: ConnectionPool>(&self, ctx: &Arc<RunContext<P>>) -> Result<(), HarnessError> {
        match &self.kind {
            OperationKind::Start { target, thread_ops } => {
                spawn_thread(ctx, target, thread_ops.clone());
            }
            OperationKind::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            OperationKind::WaitFor { target } => {
                let report = ctx.state.join_thread(target).await?;
                tracing::debug!(thread = %target, errors = report.errors.len(), "thread joined");
            }
            OperationKind::WaitForEvent { event, count } => {
                ctx.events.wait_for(event, *count).await;
            }
            OperationKind::CheckOut { label } => {
                let connection = ctx.pool.check_out().await?;
                if let Some(label) = label {
                    ctx.state.store_connection(label, connection);
                }
            }
            OperationKind::CheckIn { connection } => {
                let connection = ctx.state.take_connection(connection).await?;
                ctx.pool.check_in(connection).await?;
            }
            OperationKind::Clear => ctx.pool.clear().await?,
            OperationKind::Close => ctx.pool.close().await?,
        }
        Ok(())
    }
}

fn spawn_thread<P: ConnectionPool>(ctx: &Arc<RunContext<P>>, name: &str, ops: Vec<Operation>) {
    let task_ctx = Arc::clone(ctx);
    let thread = name.to_string();
    let handle = tokio::spawn(async move {
        let mut errors = Vec::new();
        for op in &ops {
            if let Some(jitter) = &task_ctx.jitter {
                jitter.pause().await;
            }
            match op.run(&task_ctx, false).await {
                Ok(None) => {}
                Ok(Some(record)) => errors.push(record),
                Err(err) => errors.push(ErrorRecord::from(&err)),
            }
        }
        ThreadReport {
            name: thread,
            errors,
        }
    });
    ctx.state.register_thread(name, handle);
}
