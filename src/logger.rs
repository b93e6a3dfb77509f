use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: OnceLock<()> = OnceLock::new();
static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const APP_DIR: &str = "agent-sandbox";
const LOG_FILE: &str = "agent-sandbox.log";

/// Route `tracing` output to the state-directory log file. Idempotent.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init() -> Result<()> {
    if INIT.get().is_some() {
        return Ok(());
    }

    init_inner()?;
    let _ = INIT.set(());
    Ok(())
}

fn init_inner() -> Result<()> {
    let log_path = determine_log_path(
        std::env::var("XDG_STATE_HOME").ok().as_deref(),
        home::home_dir().as_deref(),
    )?;
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory at {}", parent.display()))?;
    }

    let (directory, file_name) = split_path(&log_path)?;
    let file_appender = rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

fn determine_log_path(state_home: Option<&str>, home_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(state_home) = state_home
        && !state_home.is_empty()
    {
        return Ok(PathBuf::from(state_home).join(APP_DIR).join(LOG_FILE));
    }

    // XDG default: ~/.local/state/agent-sandbox/agent-sandbox.log
    if let Some(home_dir) = home_dir {
        return Ok(home_dir
            .join(".local")
            .join("state")
            .join(APP_DIR)
            .join(LOG_FILE));
    }

    Ok(std::env::current_dir()?.join(LOG_FILE))
}

fn split_path(path: &Path) -> Result<(PathBuf, &str)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid log file name"))?;

    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok((dir, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_home_wins() {
        let path = determine_log_path(Some("/state"), Some(Path::new("/home/u"))).unwrap();
        assert_eq!(path, PathBuf::from("/state/agent-sandbox/agent-sandbox.log"));
    }

    #[test]
    fn empty_state_home_falls_back_to_home() {
        let path = determine_log_path(Some(""), Some(Path::new("/home/u"))).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/home/u/.local/state/agent-sandbox/agent-sandbox.log")
        );
    }

    #[test]
    fn split_keeps_file_name() {
        let (dir, name) = split_path(Path::new("/a/b/c.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/a/b"));
        assert_eq!(name, "c.log");
    }
}
