use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber.
///
/// Console output is split by level: warnings and errors, which include every
/// FAIL line, go to stderr and the rest to stdout. With `log`, every line is
/// also written without ANSI colors to that file, replacing what a previous
/// run left there.
pub(crate) fn init(log: Option<&Path>) -> io::Result<()> {
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr.with_max_level(Level::WARN).or_else(io::stdout));
    let file = match log {
        Some(path) => Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };
    tracing_subscriber::registry()
        .with(LevelFilter::INFO)
        .with(console)
        .with(file)
        .try_init()
        .map_err(io::Error::other)
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}
