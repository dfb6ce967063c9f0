//! State shared by every task of a single script run.
//!
//! Two registries live here: labelled connections, which let one operation
//! check in what another checked out, possibly on a different task; and
//! named background tasks, which `waitFor` joins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

use crate::config::Jitter;
use crate::error::{ErrorRecord, HarnessError};
use crate::event::EventRecorder;
use crate::pool::ConnectionPool;

/// Outcome of one named background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReport {
    pub name: String,
    /// Error records returned by the task's operations, in execution order.
    pub errors: Vec<ErrorRecord>,
}

enum LabelSlot<C> {
    Filled(C),
    Awaited(oneshot::Sender<C>),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Label and task registries for one run.
pub struct SharedState<C> {
    labels: Mutex<HashMap<String, LabelSlot<C>>>,
    threads: Mutex<HashMap<String, JoinHandle<ThreadReport>>>,
    reports: Mutex<Vec<ThreadReport>>,
}

impl<C> Default for SharedState<C> {
    fn default() -> Self {
        Self {
            labels: Mutex::new(HashMap::new()),
            threads: Mutex::new(HashMap::new()),
            reports: Mutex::new(Vec::new()),
        }
    }
}

impl<C: Send + 'static> SharedState<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `connection` under `label`, handing it directly to a parked
    /// [`take_connection`](Self::take_connection) if one is waiting.
    pub fn store_connection(&self, label: &str, connection: C) {
        let mut labels = lock(&self.labels);
        let connection = match labels.remove(label) {
            Some(LabelSlot::Awaited(waiter)) => match waiter.send(connection) {
                Ok(()) => return,
                Err(connection) => connection,
            },
            Some(LabelSlot::Filled(_previous)) => {
                tracing::warn!(label, "label reassigned before its connection was checked in");
                connection
            }
            None => connection,
        };
        labels.insert(label.to_string(), LabelSlot::Filled(connection));
    }

    /// Remove and return the connection stored under `label`, waiting until
    /// some task stores one if the label is not populated yet.
    ///
    /// # Errors
    /// Returns [`HarnessError::Script`] if another task is already waiting on the same label.
    pub async fn take_connection(&self, label: &str) -> Result<C, HarnessError> {
        let receiver = {
            let mut labels = lock(&self.labels);
            match labels.remove(label) {
                Some(LabelSlot::Filled(connection)) => return Ok(connection),
                Some(LabelSlot::Awaited(waiter)) => {
                    labels.insert(label.to_string(), LabelSlot::Awaited(waiter));
                    return Err(HarnessError::Script(format!(
                        "connection {label:?} is already awaited by another checkIn"
                    )));
                }
                None => {
                    let (sender, receiver) = oneshot::channel();
                    labels.insert(label.to_string(), LabelSlot::Awaited(sender));
                    receiver
                }
            }
        };
        tracing::debug!(label, "waiting for connection label");
        receiver.await.map_err(|_| {
            HarnessError::Script(format!("connection {label:?} was abandoned before it was stored"))
        })
    }

    #[must_use]
    pub fn has_connection(&self, label: &str) -> bool {
        matches!(lock(&self.labels).get(label), Some(LabelSlot::Filled(_)))
    }

    pub fn register_thread(&self, name: &str, handle: JoinHandle<ThreadReport>) {
        if lock(&self.threads)
            .insert(name.to_string(), handle)
            .is_some()
        {
            tracing::warn!(thread = name, "thread name reused; earlier task is detached");
        }
    }

    /// Wait for the task registered as `name` to finish and return its report.
    ///
    /// # Errors
    /// [`HarnessError::UnknownThread`] if nothing is registered under `name`,
    /// [`HarnessError::ThreadPanicked`] if the task panicked or was aborted.
    pub async fn join_thread(&self, name: &str) -> Result<ThreadReport, HarnessError> {
        let handle = lock(&self.threads)
            .remove(name)
            .ok_or_else(|| HarnessError::UnknownThread(name.to_string()))?;
        let report = handle.await.map_err(|err| panicked(name, err))?;
        lock(&self.reports).push(report.clone());
        Ok(report)
    }

    /// Collect reports of every task joined so far plus those that have
    /// already finished on their own. Tasks still running are left detached;
    /// a finished task that panicked is reported with a single error record.
    pub async fn finish(&self) -> Vec<ThreadReport> {
        let finished: Vec<String> = {
            let threads = lock(&self.threads);
            for (name, handle) in threads.iter() {
                if !handle.is_finished() {
                    tracing::warn!(thread = %name, "thread still running at end of run; detaching");
                }
            }
            threads
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in finished {
            let joined = self.join_thread(&name).await;
            if let Err(err) = joined {
                lock(&self.reports).push(ThreadReport {
                    name,
                    errors: vec![ErrorRecord::from(&err)],
                });
            }
        }
        lock(&self.reports).clone()
    }
}

fn panicked(name: &str, err: JoinError) -> HarnessError {
    let message = if err.is_panic() {
        let payload = err.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string())
    } else {
        "task was cancelled".to_string()
    };
    HarnessError::ThreadPanicked {
        thread: name.to_string(),
        message,
    }
}

/// Seeded source of scheduling jitter, shared by every background task.
pub struct JitterSource {
    max_ms: u64,
    rng: Mutex<ChaCha8Rng>,
}

impl JitterSource {
    #[must_use]
    pub fn new(jitter: Jitter) -> Self {
        Self {
            max_ms: jitter.max_ms,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(jitter.seed)),
        }
    }

    pub async fn pause(&self) {
        let ms = lock(&self.rng).random_range(0..=self.max_ms);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

/// Everything an operation executes against.
pub struct RunContext<P: ConnectionPool> {
    pub pool: Arc<P>,
    pub state: SharedState<P::Connection>,
    pub events: Arc<EventRecorder>,
    pub jitter: Option<JitterSource>,
}

impl<P: ConnectionPool> RunContext<P> {
    #[must_use]
    pub fn new(pool: Arc<P>, events: Arc<EventRecorder>, jitter: Option<Jitter>) -> Self {
        Self {
            pool,
            state: SharedState::new(),
            events,
            jitter: jitter.map(JitterSource::new),
        }
    }
}
