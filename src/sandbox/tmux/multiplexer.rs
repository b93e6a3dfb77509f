//! The slice of tmux the terminal backend needs.
//!
//! Kept behind a trait so the completion protocol can be exercised against an
//! in-process fake without a tmux server.

use anyhow::{Context, Result, anyhow};
use std::path::Path;

use crate::cmd::Cmd;

/// Session-level multiplexer operations.
///
/// Implementations must be Send + Sync; the backend shares one instance
/// across all sandboxes.
pub trait Multiplexer: Send + Sync {
    /// Version string, e.g. "tmux 3.4"
    fn version(&self) -> Result<String>;

    /// Start a detached session named `name` running `shell` in `cwd`.
    fn new_session(&self, name: &str, cwd: &Path, shell: &str) -> Result<()>;

    fn has_session(&self, name: &str) -> Result<bool>;

    /// Returns false if the session did not exist.
    fn kill_session(&self, name: &str) -> Result<bool>;

    /// Names of all sessions; empty when no server is running.
    fn list_sessions(&self) -> Result<Vec<String>>;

    fn set_environment(&self, name: &str, key: &str, value: &str) -> Result<()>;

    /// Type `line` literally into the session's active pane, then press Enter.
    fn send_keys(&self, name: &str, line: &str) -> Result<()>;
}

/// tmux driven through its command line.
#[derive(Debug, Default, Clone)]
pub struct TmuxCli {
    /// Private server socket (`tmux -L <name>`)
    socket_name: Option<String>,
}

impl TmuxCli {
    pub fn new(socket_name: Option<&str>) -> Self {
        Self {
            socket_name: socket_name.map(str::to_string),
        }
    }

    fn tmux(&self) -> Cmd<'_> {
        match self.socket_name.as_deref() {
            Some(socket) => Cmd::new("tmux").args(&["-L", socket]),
            None => Cmd::new("tmux"),
        }
    }
}

/// Exact-match session target, so `sbx_tmx_ab` never matches `sbx_tmx_abc`.
fn session_target(name: &str) -> String {
    format!("={}", name)
}

/// Active pane of an exact-match session.
fn pane_target(name: &str) -> String {
    format!("={}:", name)
}

fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("error connecting to")
        || stderr.contains("No such file or directory")
}

impl Multiplexer for TmuxCli {
    fn version(&self) -> Result<String> {
        self.tmux()
            .arg("-V")
            .run_and_capture_stdout()
            .context("Failed to query tmux version")
    }

    fn new_session(&self, name: &str, cwd: &Path, shell: &str) -> Result<()> {
        let cwd = cwd
            .to_str()
            .ok_or_else(|| anyhow!("Working directory path contains non-UTF8 characters"))?;
        self.tmux()
            .args(&["new-session", "-d", "-s", name, "-c", cwd, shell])
            .run()
            .context("Failed to create tmux session")?;
        Ok(())
    }

    fn has_session(&self, name: &str) -> Result<bool> {
        let target = session_target(name);
        self.tmux()
            .args(&["has-session", "-t", &target])
            .run_as_check()
    }

    fn kill_session(&self, name: &str) -> Result<bool> {
        let target = session_target(name);
        self.tmux()
            .args(&["kill-session", "-t", &target])
            .run_as_check()
    }

    fn list_sessions(&self) -> Result<Vec<String>> {
        let output = self
            .tmux()
            .args(&["list-sessions", "-F", "#{session_name}"])
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_no_server(&stderr) {
                return Ok(Vec::new());
            }
            return Err(anyhow!("Failed to list tmux sessions: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn set_environment(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let target = session_target(name);
        self.tmux()
            .args(&["set-environment", "-t", &target, key, value])
            .run()
            .with_context(|| format!("Failed to set {} in tmux session", key))?;
        Ok(())
    }

    fn send_keys(&self, name: &str, line: &str) -> Result<()> {
        let target = pane_target(name);
        self.tmux()
            .args(&["send-keys", "-t", &target, "-l", line])
            .run()
            .context("Failed to send keys to session")?;

        self.tmux()
            .args(&["send-keys", "-t", &target, "Enter"])
            .run()
            .context("Failed to send Enter key to session")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_exact_match() {
        assert_eq!(session_target("sbx_tmx_abc"), "=sbx_tmx_abc");
        assert_eq!(pane_target("sbx_tmx_abc"), "=sbx_tmx_abc:");
    }

    #[test]
    fn no_server_messages_are_recognized() {
        assert!(is_no_server("no server running on /tmp/tmux-1000/default"));
        assert!(is_no_server(
            "error connecting to /tmp/tmux-1000/sbx (No such file or directory)"
        ));
        assert!(!is_no_server("unknown option -- q"));
    }
}
