use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use crate::sandbox::{Result, SandboxError};

/// Which backend to use when the caller does not name one
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct BackendConfig {
    /// Default: container
    #[serde(default)]
    pub default: Option<String>,

    /// Backend tried when the default fails its prerequisites. Default: tmux
    #[serde(default)]
    pub fallback: Option<String>,
}

impl BackendConfig {
    pub fn default_name(&self) -> &str {
        self.default.as_deref().unwrap_or("container")
    }

    pub fn fallback_name(&self) -> Option<&str> {
        match self.fallback.as_deref() {
            Some("") | Some("none") => None,
            Some(name) => Some(name),
            None => Some("tmux"),
        }
    }
}

/// Container runtime CLI
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    /// Docker (default)
    #[default]
    Docker,
    /// Podman
    Podman,
}

impl ContainerRuntime {
    pub fn binary(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "docker" => Some(ContainerRuntime::Docker),
            "podman" => Some(ContainerRuntime::Podman),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Memory limit passed to `--memory`. Default: 512m
    #[serde(default)]
    pub memory: Option<String>,

    /// Default: 100000
    #[serde(default)]
    pub cpu_period: Option<u64>,

    /// Default: 50000 (half a CPU)
    #[serde(default)]
    pub cpu_quota: Option<u64>,
}

impl ResourceLimits {
    pub fn memory(&self) -> &str {
        self.memory.as_deref().unwrap_or("512m")
    }

    pub fn cpu_period(&self) -> u64 {
        self.cpu_period.unwrap_or(100_000)
    }

    pub fn cpu_quota(&self) -> u64 {
        self.cpu_quota.unwrap_or(50_000)
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Default: 8000
    #[serde(default)]
    pub port_range_start: Option<u16>,

    /// Default: 9000
    #[serde(default)]
    pub port_range_end: Option<u16>,
}

impl NetworkConfig {
    /// Host port range used when publishing container ports.
    pub fn port_range(&self) -> (u16, u16) {
        let start = self.port_range_start.unwrap_or(8000);
        let end = self.port_range_end.unwrap_or(9000);
        if end < start { (end, start) } else { (start, end) }
    }
}

/// Settings for the container backend
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct ContainerConfig {
    /// Default: docker
    #[serde(default)]
    pub runtime: Option<ContainerRuntime>,

    /// Images are named `<prefix>-<template>:latest`. Default: agent-sandbox
    #[serde(default)]
    pub image_prefix: Option<String>,

    /// Parent of the per-sandbox host workspaces.
    /// Default: ~/.agent-sandbox/container-workspaces
    #[serde(default)]
    pub workspace_dir: Option<String>,

    /// Where the workspace is mounted inside the container. Default: /workspace
    #[serde(default)]
    pub mount_point: Option<String>,

    /// Delete the host workspace when the sandbox is killed. Default: false
    #[serde(default)]
    pub cleanup_workspace: Option<bool>,

    #[serde(default)]
    pub resource_limits: ResourceLimits,

    #[serde(default)]
    pub network: NetworkConfig,
}

impl ContainerConfig {
    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime.unwrap_or_default()
    }

    pub fn image_prefix(&self) -> &str {
        self.image_prefix.as_deref().unwrap_or("agent-sandbox")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        expand_path(
            self.workspace_dir
                .as_deref()
                .unwrap_or("~/.agent-sandbox/container-workspaces"),
        )
    }

    pub fn mount_point(&self) -> &str {
        self.mount_point.as_deref().unwrap_or("/workspace")
    }

    pub fn cleanup_workspace(&self) -> bool {
        self.cleanup_workspace.unwrap_or(false)
    }

    fn merge(self, other: Self) -> Self {
        Self {
            runtime: other.runtime.or(self.runtime),
            image_prefix: other.image_prefix.or(self.image_prefix),
            workspace_dir: other.workspace_dir.or(self.workspace_dir),
            mount_point: other.mount_point.or(self.mount_point),
            cleanup_workspace: other.cleanup_workspace.or(self.cleanup_workspace),
            resource_limits: ResourceLimits {
                memory: other.resource_limits.memory.or(self.resource_limits.memory),
                cpu_period: other
                    .resource_limits
                    .cpu_period
                    .or(self.resource_limits.cpu_period),
                cpu_quota: other
                    .resource_limits
                    .cpu_quota
                    .or(self.resource_limits.cpu_quota),
            },
            network: NetworkConfig {
                port_range_start: other
                    .network
                    .port_range_start
                    .or(self.network.port_range_start),
                port_range_end: other
                    .network
                    .port_range_end
                    .or(self.network.port_range_end),
            },
        }
    }
}

/// Settings for the tmux backend
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct TmuxConfig {
    /// Default: ~/.agent-sandbox/tmux-workspaces
    #[serde(default)]
    pub workspace_dir: Option<String>,

    /// Side files and output captures. Default: ~/.agent-sandbox/tmux-captures
    #[serde(default)]
    pub capture_dir: Option<String>,

    /// Default: false
    #[serde(default)]
    pub cleanup_workspace: Option<bool>,

    /// Shell started in each session. Default: /bin/sh
    #[serde(default)]
    pub shell: Option<String>,

    /// Private tmux server socket (`tmux -L`). Default: the user's server
    #[serde(default)]
    pub socket_name: Option<String>,

    /// How often the capture file is checked for completion. Default: 200
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl TmuxConfig {
    pub fn workspace_dir(&self) -> PathBuf {
        expand_path(
            self.workspace_dir
                .as_deref()
                .unwrap_or("~/.agent-sandbox/tmux-workspaces"),
        )
    }

    pub fn capture_dir(&self) -> PathBuf {
        expand_path(
            self.capture_dir
                .as_deref()
                .unwrap_or("~/.agent-sandbox/tmux-captures"),
        )
    }

    pub fn cleanup_workspace(&self) -> bool {
        self.cleanup_workspace.unwrap_or(false)
    }

    pub fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or("/bin/sh")
    }

    pub fn socket_name(&self) -> Option<&str> {
        self.socket_name.as_deref().filter(|s| !s.is_empty())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(200).max(1))
    }

    fn merge(self, other: Self) -> Self {
        Self {
            workspace_dir: other.workspace_dir.or(self.workspace_dir),
            capture_dir: other.capture_dir.or(self.capture_dir),
            cleanup_workspace: other.cleanup_workspace.or(self.cleanup_workspace),
            shell: other.shell.or(self.shell),
            socket_name: other.socket_name.or(self.socket_name),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
        }
    }
}

/// Timeouts in seconds
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct TimeoutConfig {
    /// Foreground command timeout. Default: 60
    #[serde(default)]
    pub default_command: Option<u64>,

    /// Sandbox lifetime when the caller does not ask for one. Default: 1800
    #[serde(default)]
    pub default_sandbox: Option<u64>,

    /// Upper bound for any sandbox lifetime. Default: 7200
    #[serde(default)]
    pub max_sandbox: Option<u64>,
}

impl TimeoutConfig {
    pub fn default_command(&self) -> Duration {
        Duration::from_secs(self.default_command.unwrap_or(60))
    }

    pub fn default_sandbox(&self) -> u64 {
        self.default_sandbox.unwrap_or(1800)
    }

    pub fn max_sandbox(&self) -> u64 {
        self.max_sandbox.unwrap_or(7200)
    }

    /// Lifetime for a new sandbox: the requested value or the default, capped.
    pub fn sandbox_timeout(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or_else(|| self.default_sandbox())
            .min(self.max_sandbox())
    }

    fn merge(self, other: Self) -> Self {
        Self {
            default_command: other.default_command.or(self.default_command),
            default_sandbox: other.default_sandbox.or(self.default_sandbox),
            max_sandbox: other.max_sandbox.or(self.max_sandbox),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub container: ContainerConfig,

    #[serde(default)]
    pub tmux: TmuxConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Settings {
    /// Load and merge every config file that exists, then apply `SBX_*`
    /// environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        debug!("config:loading");
        let mut settings = Self::default();

        for path in Self::search_paths() {
            if let Some(found) = Self::load_from_path(&path)? {
                debug!(path = %path.display(), "config:merged file");
                settings = settings.merge(found);
            }
        }

        if let Some(path) = explicit {
            let found = Self::load_from_path(path)?.ok_or_else(|| {
                SandboxError::Configuration(format!("config file not found: {}", path.display()))
            })?;
            settings = settings.merge(found);
        }

        settings.apply_env_overrides(|key| std::env::var(key).ok());
        debug!(
            backend = settings.backend.default_name(),
            runtime = settings.container.runtime().binary(),
            "config:loaded"
        );
        Ok(settings)
    }

    /// Config files in ascending precedence.
    fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home_dir) = home::home_dir() {
            paths.push(home_dir.join(".config/agent-sandbox/config.yaml"));
            paths.push(home_dir.join(".agent-sandbox/config.yaml"));
        }
        paths.push(PathBuf::from("config.yaml"));
        paths
    }

    fn load_from_path(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "config:reading file");
        let contents = fs::read_to_string(path).map_err(|e| {
            SandboxError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
            .map(Some)
            .map_err(|e| SandboxError::Configuration(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, not to a mapping.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    /// Field-wise merge where `other` wins.
    pub fn merge(self, other: Self) -> Self {
        Self {
            backend: BackendConfig {
                default: other.backend.default.or(self.backend.default),
                fallback: other.backend.fallback.or(self.backend.fallback),
            },
            container: self.container.merge(other.container),
            tmux: self.tmux.merge(other.tmux),
            timeouts: self.timeouts.merge(other.timeouts),
        }
    }

    /// Apply `SBX_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(backend) = get("SBX_BACKEND") {
            self.backend.default = Some(backend.trim().to_string());
        }
        if let Some(dir) = get("SBX_WORKSPACE_DIR") {
            self.container.workspace_dir = Some(dir);
        }
        if let Some(dir) = get("SBX_TMUX_WORKSPACE_DIR") {
            self.tmux.workspace_dir = Some(dir);
        }
        if let Some(dir) = get("SBX_CAPTURE_DIR") {
            self.tmux.capture_dir = Some(dir);
        }
        if let Some(runtime) = get("SBX_RUNTIME") {
            match ContainerRuntime::parse(&runtime) {
                Some(parsed) => self.container.runtime = Some(parsed),
                None => debug!(runtime, "config:ignoring unknown SBX_RUNTIME"),
            }
        }
    }
}

/// Expand `${VAR}` references and a leading `~` in a configured path.
///
/// Unset variables expand to the empty string.
pub fn expand_path(raw: &str) -> PathBuf {
    static VAR_RE: OnceLock<Regex> = OnceLock::new();
    let re = VAR_RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex is valid")
    });
    let expanded = re.replace_all(raw, |caps: &Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    });

    match expanded.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match home::home_dir() {
            Some(home_dir) => home_dir.join(rest.trim_start_matches('/')),
            None => PathBuf::from(expanded.as_ref()),
        },
        _ => PathBuf::from(expanded.as_ref()),
    }
}
