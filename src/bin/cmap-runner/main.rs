mod args;
mod logging;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use cmap_runner::prelude::*;

use crate::args::{Args, CliConfig};

enum Outcome {
    Passed,
    Failed(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = CliConfig::from_args(Args::parse());
    if let Err(err) = logging::init(config.log.as_deref()) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let config_json = serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string());
    tracing::info!("config: {}", config_json);

    let scripts = match load_scripts(&config.paths) {
        Ok(scripts) => scripts,
        Err(err) => {
            tracing::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let mut failures = 0usize;
    for (path, script) in scripts {
        let outcome = run_one(&path, script, &config.runner).await;
        match outcome {
            Outcome::Passed => tracing::info!("PASS {}", path.display()),
            Outcome::Failed(reason) => {
                failures += 1;
                tracing::error!("FAIL {}: {}", path.display(), reason);
                if config.fail_fast {
                    break;
                }
            }
        }
    }

    tracing::info!("complete: failures={}", failures);
    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_one(path: &Path, script: CmapScript, runner: &RunnerConfig) -> Outcome {
    tracing::info!("running {} ({})", path.display(), script.description);
    match run_script::<MemoryPool>(script, runner).await {
        Ok((_, Ok(()))) => Outcome::Passed,
        Ok((result, Err(mismatch))) => {
            let actual = serde_json::to_string(&result).unwrap_or_default();
            Outcome::Failed(format!("{mismatch}; actual: {actual}"))
        }
        Err(err) => Outcome::Failed(err.to_string()),
    }
}
