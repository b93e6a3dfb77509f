//! Disposable sandboxes behind one capability contract.
//!
//! Two backends implement [`SandboxBackend`]: [`ContainerBackend`] (docker or
//! podman, isolated) and [`TmuxBackend`] (a tmux session on the host,
//! observable but not isolated). Callers obtain instances through
//! [`BackendRegistry`] and should not need to know which one they hold,
//! except by consulting [`SandboxBackend::capabilities`].

pub mod container;
mod error;
mod ids;
pub mod registry;
pub mod tmux;
mod types;

use chrono::Utc;
use tracing::{info, warn};

pub use container::ContainerBackend;
pub use error::{Result, SandboxError};
pub use registry::{BackendConstructor, BackendRegistry};
pub use tmux::TmuxBackend;
pub use types::*;

/// The operation set every sandbox backend provides.
///
/// Implementations must be Send + Sync so they can be shared via
/// `Arc<dyn SandboxBackend>` and used from several threads at once, as long
/// as the threads target different sandboxes. Concurrent foreground commands
/// on the *same* sandbox are serialized by backends that need it.
///
/// Every operation taking a `sandbox_id` fails with
/// [`SandboxError::NotFound`] for an unknown id before touching anything,
/// except [`is_sandbox_running`](Self::is_sandbox_running) and
/// [`kill_sandbox`](Self::kill_sandbox), which answer `false`.
pub trait SandboxBackend: Send + Sync {
    /// Canonical backend name ("container" or "tmux")
    fn name(&self) -> &'static str;

    /// Fidelity of this backend relative to the full contract
    fn capabilities(&self) -> Capabilities;

    // === Lifecycle ===

    /// Create a sandbox and its workspace. Returns the new id.
    fn create_sandbox(&self, options: &CreateOptions) -> Result<String>;

    /// Re-attach to an existing sandbox, restarting it if the backend can.
    fn connect_sandbox(&self, sandbox_id: &str) -> Result<SandboxInfo>;

    fn get_sandbox_info(&self, sandbox_id: &str) -> Result<SandboxInfo>;

    fn is_sandbox_running(&self, sandbox_id: &str) -> Result<bool>;

    /// Destroy the sandbox. `Ok(false)` when there was nothing to destroy.
    fn kill_sandbox(&self, sandbox_id: &str) -> Result<bool>;

    /// `Ok(false)` when the backend cannot pause or the runtime refused.
    fn pause_sandbox(&self, sandbox_id: &str) -> Result<bool>;

    fn resume_sandbox(&self, sandbox_id: &str) -> Result<bool>;

    /// Sandboxes created by this system, at most `limit` of them.
    fn list_sandboxes(&self, limit: usize) -> Result<Vec<SandboxInfo>>;

    // === Commands ===

    /// Run a command to completion or until its timeout.
    ///
    /// A nonzero exit is a normal result. On timeout the result carries
    /// [`CommandResult::TIMED_OUT`] and whatever output was captured so far.
    fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult>;

    /// Start a command and return immediately. The pid is best-effort.
    fn run_command_background(
        &self,
        sandbox_id: &str,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult>;

    // === Files ===

    /// Entries below `path`, descending at most `depth` levels (1 = direct children).
    fn list_files(&self, sandbox_id: &str, path: &str, depth: usize) -> Result<Vec<FileInfo>>;

    fn read_file_bytes(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>>;

    /// Write `content`, creating parent directories as needed, and describe
    /// the file as it now exists.
    fn write_file_bytes(
        &self,
        sandbox_id: &str,
        path: &str,
        content: &[u8],
    ) -> Result<FileInfo>;

    fn file_exists(&self, sandbox_id: &str, path: &str) -> Result<bool>;

    fn get_file_info(&self, sandbox_id: &str, path: &str) -> Result<FileInfo>;

    /// Remove a file or a directory tree. Missing paths are an error.
    fn remove_file(&self, sandbox_id: &str, path: &str) -> Result<()>;

    /// `mkdir -p` semantics; reports whether the directory now exists.
    fn make_directory(&self, sandbox_id: &str, path: &str) -> Result<bool>;

    /// Move `old_path` to `new_path` and describe the result.
    fn rename_file(&self, sandbox_id: &str, old_path: &str, new_path: &str) -> Result<FileInfo>;

    fn read_file(&self, sandbox_id: &str, path: &str) -> Result<String> {
        let bytes = self.read_file_bytes(sandbox_id, path)?;
        String::from_utf8(bytes)
            .map_err(|_| SandboxError::FileOperation(format!("{path} is not valid UTF-8")))
    }

    fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> Result<FileInfo> {
        self.write_file_bytes(sandbox_id, path, content.as_bytes())
    }

    // === Network ===

    /// URL at which `port` inside the sandbox can be reached from the host.
    fn get_host(&self, sandbox_id: &str, port: u16) -> Result<String>;

    // === Backend ===

    /// Health of the backend as a whole. Never fails; problems are reported
    /// as an unhealthy report.
    fn health_check(&self) -> HealthReport;

    /// Kill every sandbox whose lifetime has elapsed. Returns the killed ids.
    fn reap_expired(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut reaped = Vec::new();
        for sandbox in self.list_sandboxes(usize::MAX)? {
            if !sandbox.is_expired(now) {
                continue;
            }
            match self.kill_sandbox(&sandbox.sandbox_id) {
                Ok(true) => {
                    info!(
                        backend = self.name(),
                        sandbox_id = %sandbox.sandbox_id,
                        created_at = %sandbox.created_at,
                        timeout = ?sandbox.timeout,
                        "sandbox:reaped expired"
                    );
                    reaped.push(sandbox.sandbox_id);
                }
                Ok(false) => {}
                Err(e) => warn!(
                    backend = self.name(),
                    sandbox_id = %sandbox.sandbox_id,
                    error = %e,
                    "sandbox:failed to reap"
                ),
            }
        }
        Ok(reaped)
    }
}
