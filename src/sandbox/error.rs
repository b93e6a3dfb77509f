use std::fmt::Display;

/// Errors from sandbox operations.
///
/// A command that runs and exits nonzero is *not* an error; it is a normal
/// [`CommandResult`](super::CommandResult). Capability gaps such as pausing a
/// tmux sandbox are reported as `Ok(false)`, not as an error either.
#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    /// A prerequisite was unreachable, the image is missing, or allocation failed.
    /// The sandbox never came into existence.
    #[error("failed to create sandbox: {0}")]
    Creation(String),

    #[error("sandbox not found: {0}")]
    NotFound(String),

    /// The execution mechanism itself failed (as opposed to the command
    /// returning a nonzero exit code).
    #[error("command execution failed: {0}")]
    CommandExecution(String),

    #[error("file operation failed: {0}")]
    FileOperation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown backend: {name}. Available: {available}")]
    InvalidBackend { name: String, available: String },
}

pub type Result<T> = std::result::Result<T, SandboxError>;

impl SandboxError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SandboxError::NotFound(_))
    }

    pub(crate) fn creation(err: impl Display) -> Self {
        SandboxError::Creation(format!("{err:#}"))
    }

    pub(crate) fn exec(err: impl Display) -> Self {
        SandboxError::CommandExecution(format!("{err:#}"))
    }

    pub(crate) fn file(err: impl Display) -> Self {
        SandboxError::FileOperation(format!("{err:#}"))
    }

    pub(crate) fn config(err: impl Display) -> Self {
        SandboxError::Configuration(format!("{err:#}"))
    }
}
