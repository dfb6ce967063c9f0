use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use cmap_runner::config::{DEFAULT_ADDRESS, RunnerConfig};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run CMAP pool scripts against the in-memory pool")]
pub(crate) struct Args {
    /// Script files, or directories of `*.json` scripts.
    #[arg(required = true)]
    pub(crate) paths: Vec<PathBuf>,
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    pub(crate) address: String,
    /// Pause between main-sequence operations, e.g. `10ms`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) step_delay: Option<Duration>,
    #[arg(long)]
    pub(crate) jitter_seed: Option<u64>,
    #[arg(long, default_value_t = 5)]
    pub(crate) jitter_max_ms: u64,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long)]
    pub(crate) fail_fast: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CliConfig {
    pub(crate) paths: Vec<PathBuf>,
    pub(crate) runner: RunnerConfig,
    pub(crate) log: Option<PathBuf>,
    pub(crate) fail_fast: bool,
}

impl CliConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let mut builder = RunnerConfig::builder().address(args.address);
        if let Some(step_delay) = args.step_delay {
            builder = builder.step_delay(step_delay);
        }
        if let Some(seed) = args.jitter_seed {
            builder = builder.jitter(seed, args.jitter_max_ms);
        }
        CliConfig {
            paths: args.paths,
            runner: builder.finish(),
            log: args.log,
            fail_fast: args.fail_fast,
        }
    }
}
