use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_ADDRESS: &str = "localhost:27017";
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(10);

/// Random per-operation delay injected on background tasks to shake out
/// ordering assumptions. Seeded, so a failing interleaving can be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Jitter {
    pub seed: u64,
    pub max_ms: u64,
}

/// Everything a script run needs besides the script itself.
///
/// Passed explicitly to [`Spec::setup`](crate::spec::Spec::setup); there is no
/// process-wide registry.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerConfig {
    /// Address the pool under test is created for.
    pub address: String,
    /// Pause between successive main-task operations.
    pub step_delay: Duration,
    pub jitter: Option<Jitter>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            step_delay: DEFAULT_STEP_DELAY,
            jitter: None,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::new()
    }
}

/// Fluent builder for [`RunnerConfig`].
#[derive(Debug, Clone, Default)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    #[must_use]
    pub fn step_delay(mut self, step_delay: Duration) -> Self {
        self.config.step_delay = step_delay;
        self
    }

    #[must_use]
    pub fn jitter(mut self, seed: u64, max_ms: u64) -> Self {
        self.config.jitter = Some(Jitter { seed, max_ms });
        self
    }

    #[must_use]
    pub fn finish(self) -> RunnerConfig {
        self.config
    }
}
