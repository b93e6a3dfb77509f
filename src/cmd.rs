use anyhow::{Context, Result, anyhow};
use std::io::{Read, Write};
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};
use wait_timeout::ChildExt;

/// Output of a command that ran under a deadline.
#[derive(Debug, Default)]
pub struct TimedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, `None` if the process was killed or terminated by a signal
    pub code: Option<i32>,
    pub timed_out: bool,
}

impl TimedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

/// A builder for executing external commands with unified error handling
pub struct Cmd<'a> {
    command: &'a str,
    args: Vec<&'a str>,
    stdin: Option<&'a [u8]>,
}

/// How long to wait for pipe readers after a timed-out child was killed.
/// A grandchild may still hold the pipes open; we do not wait for it.
const READER_GRACE: Duration = Duration::from_millis(200);

impl<'a> Cmd<'a> {
    /// Create a new command builder
    pub fn new(command: &'a str) -> Self {
        Self {
            command,
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Add a single argument
    pub fn arg(mut self, arg: &'a str) -> Self {
        self.args.push(arg);
        self
    }

    /// Add multiple arguments
    pub fn args(mut self, args: &[&'a str]) -> Self {
        self.args.extend_from_slice(args);
        self
    }

    /// Feed these bytes to the command's stdin
    pub fn stdin(mut self, input: &'a [u8]) -> Self {
        self.stdin = Some(input);
        self
    }

    fn display(&self) -> String {
        format!("{} {}", self.command, self.args.join(" "))
    }

    fn spawn(&self) -> Result<Child> {
        trace!(command = self.command, args = ?self.args, "cmd:spawn");

        let mut cmd = Command::new(self.command);
        cmd.args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        cmd.spawn()
            .with_context(|| format!("Failed to execute command: {}", self.display()))
    }

    /// Start a thread that writes the configured stdin and closes the pipe.
    fn feed_stdin(&self, child: &mut Child) -> Option<JoinHandle<std::io::Result<()>>> {
        let input = self.stdin?.to_vec();
        let mut pipe = child.stdin.take()?;
        Some(thread::spawn(move || pipe.write_all(&input)))
    }

    /// Execute the command and return its output regardless of exit status.
    pub fn output(self) -> Result<Output> {
        let mut child = self.spawn()?;
        let writer = self.feed_stdin(&mut child);
        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for command: {}", self.display()))?;
        if let Some(writer) = writer {
            writer
                .join()
                .map_err(|_| anyhow!("stdin writer thread panicked"))?
                .with_context(|| format!("Failed to write stdin of: {}", self.display()))?;
        }
        trace!(command = self.command, status = ?output.status.code(), "cmd:output");
        Ok(output)
    }

    /// Execute the command and return the output
    /// Returns an error if the command fails (non-zero exit code)
    pub fn run(self) -> Result<Output> {
        let display = self.display();
        let command = self.command;
        let output = self.output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                command,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "cmd:run failure"
            );
            return Err(anyhow!("Command failed: {}\n{}", display, stderr.trim()));
        }
        trace!(command, "cmd:run success");
        Ok(output)
    }

    /// Execute the command and return stdout as a trimmed string
    pub fn run_and_capture_stdout(self) -> Result<String> {
        let output = self.run()?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    /// Execute the command, returning Ok(true) if it succeeds, Ok(false) if it fails
    pub fn run_as_check(self) -> Result<bool> {
        let command = self.command;
        let output = self.output()?;
        let success = output.status.success();
        trace!(command, success, "cmd:check result");
        Ok(success)
    }

    /// Execute the command, killing it once `timeout` elapses.
    ///
    /// Stdout and stderr are drained on background threads so a chatty child
    /// cannot block on a full pipe while we wait. Whatever was read before the
    /// kill is returned alongside `timed_out = true`.
    pub fn output_with_timeout(self, timeout: Duration) -> Result<TimedOutput> {
        let mut child = self.spawn()?;
        let writer = self.feed_stdin(&mut child);
        let stdout_reader = child.stdout.take().map(drain);
        let stderr_reader = child.stderr.take().map(drain);

        let status = child
            .wait_timeout(timeout)
            .with_context(|| format!("Failed to wait for command: {}", self.display()))?;

        let (code, timed_out) = match status {
            Some(status) => (status.code(), false),
            None => {
                debug!(
                    command = self.command,
                    timeout_ms = timeout.as_millis() as u64,
                    "cmd:timeout, killing child"
                );
                let _ = child.kill();
                let _ = child.wait();
                (None, true)
            }
        };

        if let Some(writer) = writer {
            // A killed child closes its stdin early; a broken pipe here is expected.
            let _ = writer.join();
        }

        Ok(TimedOutput {
            stdout: collect(stdout_reader, timed_out),
            stderr: collect(stderr_reader, timed_out),
            code,
            timed_out,
        })
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

fn collect(reader: Option<Receiver<Vec<u8>>>, timed_out: bool) -> Vec<u8> {
    let Some(rx) = reader else {
        return Vec::new();
    };
    let received = if timed_out {
        rx.recv_timeout(READER_GRACE).ok()
    } else {
        rx.recv().ok()
    };
    received.unwrap_or_default()
}
