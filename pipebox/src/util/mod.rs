use std::io::IsTerminal;
use std::path::Path;

use pipebox_shared::{BoxError, BoxResult};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::runtime::environment::Environment;

/// File name used by [`init_file_logging`].
const LOG_FILE_NAME: &str = "pipebox.log";

/// Install the global subscriber writing to stderr.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (e.g. `"info"`)
/// is used. Keep the returned guard alive to flush buffered lines.
pub fn init_logging(default_directive: &str) -> WorkerGuard {
    let ansi = std::io::stderr().is_terminal();
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    if !register_to_tracing(non_blocking, env_filter(default_directive), ansi) {
        tracing::debug!("Global subscriber already installed, stderr logging skipped");
    }
    guard
}

/// Install the global subscriber writing to `<logs_dir>/pipebox.log` with
/// daily rotation.
pub fn init_file_logging(logs_dir: &Path, default_directive: &str) -> BoxResult<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)?;
    let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if !register_to_tracing(non_blocking, env_filter(default_directive), false) {
        tracing::debug!(
            logs_dir = %logs_dir.display(),
            "Global subscriber already installed, file logging skipped"
        );
    }
    Ok(guard)
}

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a fmt layer writing to `writer` under `env_filter` as the global
/// subscriber.
///
/// Returns `false` if a subscriber was already installed; it stays in place.
pub fn register_to_tracing(writer: NonBlocking, env_filter: EnvFilter, ansi: bool) -> bool {
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(ansi);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()
        .is_ok()
}

/// Split a command line into words using shell quoting rules.
pub fn split_command(line: &str) -> BoxResult<Vec<String>> {
    shlex::split(line).ok_or_else(|| BoxError::Config(format!("cannot tokenize '{}'", line)))
}

/// `KEY=value` entries for a container: keys upper-cased, values interpolated.
pub fn container_env(pairs: &[(String, String)], env: &Environment) -> Vec<String> {
    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", key.to_uppercase(), env.interpolate(value)))
        .collect()
}
