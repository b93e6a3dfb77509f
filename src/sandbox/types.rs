//! Vocabulary shared by every backend.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Which technology backs a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Docker/Podman container
    Container,
    /// tmux session on the host
    Tmux,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Container => "container",
            BackendKind::Tmux => "tmux",
        }
    }

    /// Prefix of every sandbox id minted by this backend kind.
    ///
    /// Distinct per kind so ids from different backends never collide.
    pub fn id_prefix(self) -> &'static str {
        match self {
            BackendKind::Container => "sbx_ctr_",
            BackendKind::Tmux => "sbx_tmx_",
        }
    }

    pub fn owns_id(self, sandbox_id: &str) -> bool {
        sandbox_id
            .strip_prefix(self.id_prefix())
            .is_some_and(|rest| !rest.is_empty())
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sandbox lifecycle states.
///
/// `Stopped` and `Error` are terminal for containers. tmux sandboxes are only
/// ever `Running`; a missing session is reported as not-found instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    Creating,
    Running,
    Paused,
    Stopped,
    Error,
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxStatus::Creating => "creating",
            SandboxStatus::Running => "running",
            SandboxStatus::Paused => "paused",
            SandboxStatus::Stopped => "stopped",
            SandboxStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Everything a caller can learn about one sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub sandbox_id: String,
    pub backend: BackendKind,
    pub status: SandboxStatus,
    /// RFC 3339 creation time, empty if unknown
    pub created_at: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Container port -> reachable URL
    #[serde(default)]
    pub ports: Option<BTreeMap<u16, String>>,
    /// Lifetime in seconds after which `reap_expired` may kill the sandbox
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl SandboxInfo {
    /// The instant after which the sandbox is considered expired.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let created = DateTime::parse_from_rfc3339(&self.created_at).ok()?;
        let lifetime = chrono::Duration::seconds(i64::try_from(self.timeout?).ok()?);
        Some(created.with_timezone(&Utc) + lifetime)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| deadline <= now)
    }
}

/// Result of a foreground or background command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Process id of a backgrounded command, when the backend can learn it
    #[serde(default)]
    pub pid: Option<String>,
}

impl CommandResult {
    /// Exit code meaning "completion could not be confirmed before the timeout".
    pub const TIMED_OUT: i32 = -1;

    pub fn timed_out(&self) -> bool {
        self.exit_code == Self::TIMED_OUT
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Dir,
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::File => f.write_str("file"),
            FileType::Dir => f.write_str("dir"),
        }
    }
}

/// File or directory metadata as seen from inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    /// Backend-native path (in-container path, or host path for tmux)
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub size: u64,
    /// Octal permission bits, e.g. `644`
    pub permissions: String,
    #[serde(default)]
    pub modified_at: Option<String>,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }
}

/// Parameters for `create_sandbox`.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Template name, e.g. `python`. Containers map it to an image.
    pub template: Option<String>,
    /// Sandbox lifetime in seconds
    pub timeout: Option<u64>,
    pub envs: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
    /// Container ports to publish on the host (ignored by tmux)
    pub ports: Vec<u16>,
}

/// Parameters for `run_command` and `run_command_background`.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    /// Working directory; defaults to the workspace
    pub cwd: Option<String>,
    pub envs: BTreeMap<String, String>,
    /// Per-call timeout; `None` uses the backend's configured default
    pub timeout: Option<Duration>,
    /// Run through `/bin/sh -c`. Only meaningful for containers; tmux always
    /// types commands into its shell.
    pub shell: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            envs: BTreeMap::new(),
            timeout: None,
            shell: true,
        }
    }
}

impl CommandOptions {
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Backend-wide health summary (not tied to any sandbox).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub backend: String,
    pub status: HealthStatus,
    #[serde(default)]
    pub version: Option<String>,
    /// Capacity counters and other backend-specific facts
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn healthy(backend: BackendKind, version: impl Into<String>) -> Self {
        Self {
            backend: backend.name().to_string(),
            status: HealthStatus::Healthy,
            version: Some(version.into()),
            details: BTreeMap::new(),
            error: None,
        }
    }

    pub fn unhealthy(backend: BackendKind, error: impl std::fmt::Display) -> Self {
        Self {
            backend: backend.name().to_string(),
            status: HealthStatus::Unhealthy,
            version: None,
            details: BTreeMap::new(),
            error: Some(format!("{error:#}")),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// What a backend can and cannot do faithfully.
///
/// Callers that need one of these guarantees should check before relying on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// stdout and stderr are captured separately
    pub separate_stderr: bool,
    /// pause/resume are real operations
    pub pause: bool,
    /// background commands report a pid
    pub background_pid: bool,
    /// processes are isolated from the host
    pub isolated: bool,
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn system_time_rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Convert a unix timestamp (fractional seconds allowed) to RFC 3339.
pub(crate) fn epoch_rfc3339(secs: f64) -> Option<String> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(whole, nanos)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(created_at: &str, timeout: Option<u64>) -> SandboxInfo {
        SandboxInfo {
            sandbox_id: "sbx_tmx_000000000001".into(),
            backend: BackendKind::Tmux,
            status: SandboxStatus::Running,
            created_at: created_at.into(),
            template: None,
            metadata: BTreeMap::new(),
            ports: None,
            timeout,
        }
    }

    #[test]
    fn id_prefixes_are_namespaced() {
        assert!(BackendKind::Tmux.owns_id("sbx_tmx_abc"));
        assert!(!BackendKind::Tmux.owns_id("sbx_ctr_abc"));
        assert!(!BackendKind::Container.owns_id("sbx_ctr_"));
        assert!(!BackendKind::Container.owns_id("main"));
    }

    #[test]
    fn expiry_uses_created_at_plus_timeout() {
        let sandbox = info("2026-01-01T00:00:00Z", Some(60));
        let before = DateTime::parse_from_rfc3339("2026-01-01T00:00:59Z")
            .unwrap()
            .with_timezone(&Utc);
        let after = DateTime::parse_from_rfc3339("2026-01-01T00:01:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!sandbox.is_expired(before));
        assert!(sandbox.is_expired(after));
    }

    #[test]
    fn missing_timeout_or_timestamp_never_expires() {
        let far_future = Utc::now() + chrono::Duration::days(3650);
        assert!(!info("2026-01-01T00:00:00Z", None).is_expired(far_future));
        assert!(!info("", Some(1)).is_expired(far_future));
    }

    #[test]
    fn file_info_serializes_type_field() {
        let fi = FileInfo {
            name: "a.txt".into(),
            path: "/workspace/a.txt".into(),
            file_type: FileType::File,
            size: 3,
            permissions: "644".into(),
            modified_at: None,
        };
        let json = serde_json::to_value(&fi).unwrap();
        assert_eq!(json["type"], "file");
    }

    #[test]
    fn epoch_conversion() {
        assert_eq!(
            epoch_rfc3339(1_700_000_000.75).as_deref(),
            Some("2023-11-14T22:13:20Z")
        );
        assert_eq!(epoch_rfc3339(-1.0), None);
    }

    #[test]
    fn timed_out_result() {
        let result = CommandResult {
            exit_code: CommandResult::TIMED_OUT,
            ..Default::default()
        };
        assert!(result.timed_out());
        assert!(!result.success());
    }
}
