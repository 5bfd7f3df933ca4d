//! Tracing subscriber setup.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `RUST_LOG` | `ranj_worker=info,ranj_jobs=info` |
//! | `LOG_FORMAT` | `text` (`json` for structured output) |
//! | `LOG_FILE` | unset (stdout) |
//! | `LOG_ANSI` | auto-detected, off for files |

use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "ranj_worker=info,ranj_jobs=info";
const DEFAULT_LOG_FILE_NAME: &str = "ranj-worker.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    pub file: Option<String>,
    pub ansi: Option<bool>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            format: LogFormat::parse(lookup("LOG_FORMAT").as_deref()),
            file: lookup("LOG_FILE").filter(|f| !f.trim().is_empty()),
            ansi: lookup("LOG_ANSI").map(|v| v == "true" || v == "1"),
        }
    }
}

/// Split a log file path into the directory and file name handed to the
/// rolling appender.
fn split_log_path(path: &str) -> (&Path, &str) {
    let path = Path::new(path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(DEFAULT_LOG_FILE_NAME);
    (dir, name)
}

/// Install the global subscriber. The returned guard must be held for the
/// life of the process when logging to a file, or buffered lines are lost.
pub fn init(settings: &LogSettings) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = match settings.file.as_deref() {
        Some(path) => {
            let (dir, name) = split_log_path(path);
            let file_appender = tracing_appender::rolling::daily(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            match settings.format {
                LogFormat::Json => registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(non_blocking),
                    )
                    .init(),
                LogFormat::Text => registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(non_blocking)
                            .with_ansi(settings.ansi.unwrap_or(false)),
                    )
                    .init(),
            }
            Some(guard)
        }
        None => {
            match settings.format {
                LogFormat::Json => registry
                    .with(tracing_subscriber::fmt::layer().json())
                    .init(),
                LogFormat::Text => {
                    let mut layer = tracing_subscriber::fmt::layer();
                    if let Some(ansi) = settings.ansi {
                        layer = layer.with_ansi(ansi);
                    }
                    registry.with(layer).init();
                }
            }
            None
        }
    };

    info!(
        subsystem = "worker",
        log_format = ?settings.format,
        log_file = settings.file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    guard
}
