//! Completion detection for commands typed into a terminal.
//!
//! A command's output is redirected into a capture file, followed by an
//! `echo` of a per-invocation marker and the exit status. The caller polls the
//! capture file until the marker shows up or the deadline passes.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::sandbox::ids::random_hex;
use crate::shell::{shell_escape, shell_quote};

const MARKER_PREFIX: &str = "__SBX_EXIT_";
const MARKER_SUFFIX: &str = "__";

/// A 128-bit token identifying one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitMarker {
    token: String,
}

impl ExitMarker {
    pub fn generate() -> Result<Self, getrandom::Error> {
        Ok(Self {
            token: random_hex(16)?,
        })
    }

    /// The text that appears in the capture file once the command finished.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn marker(&self) -> String {
        format!("{MARKER_PREFIX}{}{MARKER_SUFFIX}", self.token)
    }

    /// Shell words that print the marker followed by `$?`.
    ///
    /// Quote boundaries split the marker, so the keystrokes never contain it
    /// verbatim; only the echo's output does.
    fn echo_words(&self) -> String {
        format!("\"{MARKER_PREFIX}\"'{}'\"{MARKER_SUFFIX}$?\"", self.token)
    }
}

/// Everything needed to compose one typed line.
pub struct CommandLine<'a> {
    /// Directory to `cd` into; already translated to a host path
    pub cwd: &'a str,
    /// `export ...` clause, if any variables apply
    pub exports: Option<&'a str>,
    pub command: &'a str,
}

impl CommandLine<'_> {
    fn prelude(&self) -> String {
        let mut prelude = format!("cd {}", shell_quote(self.cwd));
        if let Some(exports) = self.exports {
            prelude.push_str(" && ");
            prelude.push_str(exports);
        }
        prelude
    }

    /// Foreground line: output into `capture`, then the marker with the status.
    ///
    /// Stdin is `/dev/null` so a command that reads input fails fast instead of
    /// waiting on the terminal forever.
    pub fn foreground(&self, capture: &Path, marker: &ExitMarker) -> String {
        let capture = shell_quote(&capture.to_string_lossy());
        format!(
            "( {} && eval '{}' ) < /dev/null > {} 2>&1; echo {} >> {}",
            self.prelude(),
            shell_escape(self.command),
            capture,
            marker.echo_words(),
            capture,
        )
    }

    /// Background line: detached from the terminal, output discarded.
    ///
    /// Only the `nohup` is backgrounded, so no process keeps the terminal's
    /// descriptors open.
    pub fn background(&self) -> String {
        format!(
            "( {} && {{ nohup sh -c '{}' > /dev/null 2>&1 < /dev/null & }} )",
            self.prelude(),
            shell_escape(self.command),
        )
    }
}

/// Split a capture into (output, exit code) once the marker line is complete.
///
/// Returns `None` while the marker, or the newline ending its line, has not
/// been written yet. An unparseable status counts as 0.
pub fn parse_capture(content: &str, marker: &str) -> Option<(String, i32)> {
    let idx = content.rfind(marker)?;
    let rest = &content[idx + marker.len()..];
    let end = rest.find('\n')?;
    let exit_code = rest[..end].trim().parse().unwrap_or(0);
    Some((content[..idx].trim().to_string(), exit_code))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Finished { output: String, exit_code: i32 },
    /// The deadline passed first; `partial` is whatever had been captured
    TimedOut { partial: String },
}

/// Poll `capture` every `interval` until `marker` appears or `timeout` passes.
///
/// Overshoot past the deadline is bounded by one read of the file.
pub fn wait_for_completion(
    capture: &Path,
    marker: &str,
    timeout: Duration,
    interval: Duration,
) -> std::io::Result<Completion> {
    let deadline = Instant::now() + timeout;
    loop {
        let content = read_capture(capture)?;
        if let Some((output, exit_code)) = parse_capture(&content, marker) {
            return Ok(Completion::Finished { output, exit_code });
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(Completion::TimedOut {
                partial: content.trim().to_string(),
            });
        }
        thread::sleep(interval.min(deadline - now));
    }
}

fn read_capture(path: &Path) -> std::io::Result<String> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}
