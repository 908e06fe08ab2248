//! Subscriber setup. The terminal UI owns the screen, so interactive runs log
//! to a file; one-shot commands log to stderr.

use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "boba.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stderr,
    File(PathBuf),
}

/// Flushes buffered file output when dropped; hold it until exit.
#[must_use]
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

pub fn init(output: &LogOutput, verbose: bool) -> LoggingGuard {
    match output {
        LogOutput::Stderr => {
            install(
                tracing_subscriber::fmt()
                    .with_env_filter(build_env_filter(default_filter(output, verbose)))
                    .with_writer(io::stderr)
                    .with_target(false)
                    .try_init(),
            );
            LoggingGuard {
                _worker_guard: None,
            }
        }
        LogOutput::File(dir) => match file_writer(dir) {
            Ok((writer, guard)) => {
                install(
                    tracing_subscriber::fmt()
                        .with_env_filter(build_env_filter(default_filter(output, verbose)))
                        .with_writer(writer)
                        .with_ansi(false)
                        .try_init(),
                );
                LoggingGuard {
                    _worker_guard: Some(guard),
                }
            }
            Err(error) => {
                eprintln!(
                    "warning: logging disabled, cannot open {}: {error}",
                    dir.display()
                );
                LoggingGuard {
                    _worker_guard: None,
                }
            }
        },
    }
}

fn install(result: Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>) {
    if let Err(error) = result {
        eprintln!("warning: tracing subscriber already installed: {error}");
    }
}

pub fn file_writer(dir: &Path) -> io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
    Ok(tracing_appender::non_blocking(appender))
}

/// Priority: `BOBA_LOG`, then `RUST_LOG`, then `fallback`.
fn build_env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_env("BOBA_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Stderr shares the terminal with command output, so it only carries
/// warnings unless `--verbose` is set.
#[must_use]
pub fn default_filter(output: &LogOutput, verbose: bool) -> &'static str {
    match (output, verbose) {
        (_, true) => "debug,mysql_async=info,rustls=warn",
        (LogOutput::File(_), false) => "info,mysql_async=warn",
        (LogOutput::Stderr, false) => "warn",
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{default_filter, file_writer, LogOutput};

    #[test]
    fn verbose_raises_level_for_every_output() {
        let file = LogOutput::File(PathBuf::from("logs"));
        assert!(default_filter(&file, true).starts_with("debug"));
        assert!(default_filter(&LogOutput::Stderr, true).starts_with("debug"));
        assert!(default_filter(&file, false).starts_with("info"));
        assert_eq!(default_filter(&LogOutput::Stderr, false), "warn");
    }

    #[test]
    fn file_writer_creates_missing_log_directory() {
        let temp_dir = TempDir::new().expect("temp dir");
        let dir = temp_dir.path().join("nested").join("logs");

        let (_writer, _guard) = file_writer(&dir).expect("writer");

        assert!(dir.is_dir());
    }
}
