//! Sandboxes as docker or podman containers.
//!
//! Each sandbox is one long-running container named after its id, with a host
//! workspace bind-mounted at the mount point. Everything `list` and `info`
//! report is read back from container labels, so no local state is kept.

mod archive;
mod listing;
mod runtime;

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cmd::TimedOutput;
use crate::config::{ResourceLimits, Settings, TimeoutConfig};
use crate::shell::{first_invalid_env_key, shell_quote};

use super::ids::unused_sandbox_id;
use super::{
    BackendKind, Capabilities, CommandOptions, CommandResult, CreateOptions, FileInfo,
    HealthReport, Result, SandboxBackend, SandboxError, SandboxInfo, SandboxStatus, now_rfc3339,
};

pub use runtime::{ContainerDetails, ContainerEngine, RuntimeCli};

const KIND: BackendKind = BackendKind::Container;

pub const LABEL_SANDBOX_ID: &str = "agent-sandbox.sandbox_id";
pub const LABEL_CREATED_BY: &str = "agent-sandbox.created_by";
pub const LABEL_TEMPLATE: &str = "agent-sandbox.template";
pub const LABEL_CREATED_AT: &str = "agent-sandbox.created_at";
pub const LABEL_TIMEOUT: &str = "agent-sandbox.timeout";
pub const LABEL_META_PREFIX: &str = "agent-sandbox.meta.";
pub const CREATED_BY: &str = "agent-sandbox";

/// Grace period for `stop` before the runtime kills the container.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Run as `sh -c CAPPED_SCRIPT <secs> <argv...>`. Uses the image's `timeout`
/// when it has one, so an overrunning command is killed inside the container.
const CAPPED_SCRIPT: &str =
    r#"if command -v timeout >/dev/null 2>&1; then exec timeout -k 1 "$0" "$@"; fi; exec "$@""#;

/// Exit statuses `timeout` reports after stopping the command (TERM, then KILL).
const CAPPED_EXIT_CODES: [i32; 2] = [124, 137];

/// Extra time the exec client gets beyond the in-container limit.
const EXEC_CLIENT_GRACE: Duration = Duration::from_secs(3);

/// `timeout` duration argument with millisecond precision. Zero would mean
/// "no limit", so the shortest limit is one millisecond.
fn timeout_arg(limit: Duration) -> String {
    let limit = limit.max(Duration::from_millis(1));
    format!("{}.{:03}", limit.as_secs(), limit.subsec_millis())
}

/// `argv` wrapped so the container enforces `limit` itself.
fn capped_argv(limit: Duration, argv: &[&str]) -> Vec<String> {
    let mut capped = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        CAPPED_SCRIPT.to_string(),
        timeout_arg(limit),
    ];
    capped.extend(argv.iter().map(|a| a.to_string()));
    capped
}

/// Whether an exec that ran for `elapsed` was stopped by the `limit` wrapper.
fn hit_limit(output: &TimedOutput, elapsed: Duration, limit: Duration) -> bool {
    output.timed_out
        || (elapsed >= limit && output.code.is_some_and(|c| CAPPED_EXIT_CODES.contains(&c)))
}

/// Map a runtime state string onto the sandbox lifecycle.
pub fn map_status(state: &str) -> SandboxStatus {
    match state {
        "running" => SandboxStatus::Running,
        "paused" => SandboxStatus::Paused,
        "exited" | "removing" => SandboxStatus::Stopped,
        "created" | "restarting" => SandboxStatus::Creating,
        _ => SandboxStatus::Error,
    }
}

pub struct ContainerBackend {
    runtime: Box<dyn ContainerEngine>,
    image_prefix: String,
    workspace_root: PathBuf,
    mount_point: String,
    cleanup_workspace: bool,
    limits: ResourceLimits,
    port_range: (u16, u16),
    timeouts: TimeoutConfig,
}

impl ContainerBackend {
    /// Build a backend for the configured runtime. Fails if the runtime CLI is
    /// missing or its daemon does not answer.
    pub fn new(settings: &Settings) -> Result<Self> {
        let runtime = RuntimeCli::new(settings.container.runtime());
        which::which(runtime.binary()).map_err(|_| {
            SandboxError::Creation(format!("{} not found in PATH", runtime.binary()))
        })?;
        Self::with_engine(settings, Box::new(runtime))
    }

    /// Build a backend on top of any [`ContainerEngine`].
    pub fn with_engine(settings: &Settings, runtime: Box<dyn ContainerEngine>) -> Result<Self> {
        let container = &settings.container;
        runtime.info().map_err(SandboxError::creation)?;

        let workspace_root = container.workspace_dir();
        fs::create_dir_all(&workspace_root).map_err(|e| {
            SandboxError::Configuration(format!(
                "cannot create workspace directory {}: {}",
                workspace_root.display(),
                e
            ))
        })?;

        debug!(runtime = runtime.binary(), "container:backend ready");
        Ok(Self {
            runtime,
            image_prefix: container.image_prefix().to_string(),
            workspace_root,
            mount_point: container.mount_point().to_string(),
            cleanup_workspace: container.cleanup_workspace(),
            limits: container.resource_limits.clone(),
            port_range: container.network.port_range(),
            timeouts: settings.timeouts.clone(),
        })
    }

    /// `<prefix>-<template or base>:latest`
    pub fn image_for(&self, template: Option<&str>) -> String {
        format!("{}-{}:latest", self.image_prefix, template.unwrap_or("base"))
    }

    fn workspace(&self, sandbox_id: &str) -> PathBuf {
        self.workspace_root.join(sandbox_id)
    }

    /// A container we created, or `NotFound`.
    fn lookup(&self, sandbox_id: &str) -> Result<ContainerDetails> {
        self.find(sandbox_id)?
            .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))
    }

    /// `Ok(None)` for ids that are not ours, even if a container by that name exists.
    fn find(&self, sandbox_id: &str) -> Result<Option<ContainerDetails>> {
        if !KIND.owns_id(sandbox_id) {
            return Ok(None);
        }
        let details = self
            .runtime
            .inspect(sandbox_id)
            .map_err(SandboxError::exec)?;
        Ok(details.filter(|d| d.label(LABEL_SANDBOX_ID) == Some(sandbox_id)))
    }

    /// A running container, or `NotFound`/`CommandExecution`.
    fn lookup_running(&self, sandbox_id: &str) -> Result<ContainerDetails> {
        let details = self.lookup(sandbox_id)?;
        if !details.state.running {
            return Err(SandboxError::CommandExecution(format!(
                "sandbox {} is not running ({})",
                sandbox_id, details.state.status
            )));
        }
        Ok(details)
    }

    fn to_info(&self, details: &ContainerDetails) -> SandboxInfo {
        let ports = details.published_ports();
        SandboxInfo {
            sandbox_id: details
                .label(LABEL_SANDBOX_ID)
                .unwrap_or(details.name.trim_start_matches('/'))
                .to_string(),
            backend: KIND,
            status: map_status(&details.state.status),
            created_at: details
                .label(LABEL_CREATED_AT)
                .unwrap_or(details.created.as_str())
                .to_string(),
            template: details.label(LABEL_TEMPLATE).map(str::to_string),
            metadata: details.labels_with_prefix(LABEL_META_PREFIX),
            ports: (!ports.is_empty()).then_some(ports),
            timeout: details.label(LABEL_TIMEOUT).and_then(|t| t.parse().ok()),
        }
    }

    /// In-container path for a caller path; relative paths hang off the mount point.
    fn container_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            let path = path.trim_start_matches("./");
            if path.is_empty() || path == "." {
                self.mount_point.clone()
            } else {
                format!("{}/{}", self.mount_point.trim_end_matches('/'), path)
            }
        }
    }

    fn run_args(
        &self,
        sandbox_id: &str,
        image: &str,
        workspace: &Path,
        options: &CreateOptions,
        timeout: u64,
    ) -> Vec<String> {
        let mut args: Vec<String> = [
            "-d",
            "-t",
            "-i",
            "--pull",
            "never",
            "--name",
            sandbox_id,
            "--workdir",
            self.mount_point.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push("--mount".to_string());
        args.push(format!(
            "type=bind,source={},target={}",
            workspace.display(),
            self.mount_point
        ));

        args.push("--memory".to_string());
        args.push(self.limits.memory().to_string());
        args.push("--cpu-period".to_string());
        args.push(self.limits.cpu_period().to_string());
        args.push("--cpu-quota".to_string());
        args.push(self.limits.cpu_quota().to_string());

        let mut labels = vec![
            (LABEL_SANDBOX_ID.to_string(), sandbox_id.to_string()),
            (LABEL_CREATED_BY.to_string(), CREATED_BY.to_string()),
            (
                LABEL_TEMPLATE.to_string(),
                options.template.clone().unwrap_or_else(|| "base".to_string()),
            ),
            (LABEL_CREATED_AT.to_string(), now_rfc3339()),
            (LABEL_TIMEOUT.to_string(), timeout.to_string()),
        ];
        labels.extend(
            options
                .metadata
                .iter()
                .map(|(k, v)| (format!("{}{}", LABEL_META_PREFIX, k), v.clone())),
        );
        for (key, value) in labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        for (key, value) in &options.envs {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }

        let (start, end) = self.port_range;
        for port in &options.ports {
            args.push("--publish".to_string());
            args.push(format!("127.0.0.1:{}-{}:{}", start, end, port));
        }

        args.push(image.to_string());
        args
    }

    /// Exec an argv for a file operation, bounded by the default command timeout.
    fn exec_file_op(&self, sandbox_id: &str, argv: &[&str]) -> Result<TimedOutput> {
        self.lookup_running(sandbox_id)?;
        let output = self
            .runtime
            .exec(
                sandbox_id,
                &self.mount_point,
                &BTreeMap::new(),
                argv,
                self.timeouts.default_command(),
            )
            .map_err(SandboxError::file)?;
        if output.timed_out {
            return Err(SandboxError::FileOperation(format!(
                "{} timed out",
                argv.join(" ")
            )));
        }
        Ok(output)
    }

    fn remove_workspace(&self, sandbox_id: &str) {
        let workspace = self.workspace(sandbox_id);
        if let Err(e) = fs::remove_dir_all(&workspace)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(sandbox_id, error = %e, "container:failed to remove workspace");
        }
    }
}

fn file_op_failure(action: &str, path: &str, output: &TimedOutput) -> SandboxError {
    let stderr = output.stderr_lossy();
    let detail = stderr.trim();
    if detail.is_empty() {
        SandboxError::FileOperation(format!("{} {} failed", action, path))
    } else {
        SandboxError::FileOperation(format!("{} {}: {}", action, path, detail))
    }
}

/// Summarize `info` JSON from docker or podman into (version, counters).
fn summarize_info(info: &serde_json::Value) -> (Option<String>, BTreeMap<String, String>) {
    let pick = |paths: &[&str]| {
        paths.iter().find_map(|p| {
            let value = info.pointer(p)?;
            match value {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        })
    };

    let version = pick(&["/ServerVersion", "/version/Version"]);
    let mut details = BTreeMap::new();
    for (key, paths) in [
        (
            "containers_running",
            &["/ContainersRunning", "/store/containerStore/running"][..],
        ),
        ("containers_total", &["/Containers", "/store/containerStore/number"][..]),
        ("images", &["/Images", "/store/imageStore/number"][..]),
    ] {
        if let Some(value) = pick(paths) {
            details.insert(key.to_string(), value);
        }
    }
    (version, details)
}

impl SandboxBackend for ContainerBackend {
    fn name(&self) -> &'static str {
        KIND.name()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            separate_stderr: true,
            pause: true,
            background_pid: true,
            isolated: true,
        }
    }

    fn create_sandbox(&self, options: &CreateOptions) -> Result<String> {
        if let Some(key) = first_invalid_env_key(&options.envs) {
            return Err(SandboxError::Creation(format!(
                "invalid environment variable name: {}",
                key
            )));
        }

        let image = self.image_for(options.template.as_deref());
        if !self
            .runtime
            .image_exists(&image)
            .map_err(SandboxError::creation)?
        {
            return Err(SandboxError::Creation(format!(
                "image not found: {}. Build it with: {} build -t {} .",
                image,
                self.runtime.binary(),
                image
            )));
        }

        let sandbox_id = unused_sandbox_id(KIND, |id| {
            Ok(self
                .runtime
                .inspect(id)
                .map_err(SandboxError::creation)?
                .is_some())
        })?;
        let workspace = self.workspace(&sandbox_id);
        fs::create_dir_all(&workspace).map_err(|e| {
            SandboxError::Creation(format!(
                "cannot create workspace {}: {}",
                workspace.display(),
                e
            ))
        })?;

        let timeout = self.timeouts.sandbox_timeout(options.timeout);
        let args = self.run_args(&sandbox_id, &image, &workspace, options, timeout);
        if let Err(e) = self.runtime.run(&args) {
            // `run` may have created the container before failing to start it.
            if let Err(rm) = self.runtime.remove(&sandbox_id) {
                debug!(sandbox_id, error = %rm, "container:nothing to remove while unwinding");
            }
            self.remove_workspace(&sandbox_id);
            return Err(SandboxError::creation(e));
        }

        info!(
            sandbox_id = %sandbox_id,
            image = %image,
            workspace = %workspace.display(),
            "container:sandbox created"
        );
        Ok(sandbox_id)
    }

    fn connect_sandbox(&self, sandbox_id: &str) -> Result<SandboxInfo> {
        let details = self.lookup(sandbox_id)?;
        if details.state.running {
            return Ok(self.to_info(&details));
        }

        if details.state.status == "paused" {
            self.runtime
                .unpause(sandbox_id)
                .map_err(SandboxError::exec)?;
        } else {
            self.runtime.start(sandbox_id).map_err(SandboxError::exec)?;
        }
        info!(sandbox_id, previous = %details.state.status, "container:sandbox restarted");
        let details = self.lookup(sandbox_id)?;
        Ok(self.to_info(&details))
    }

    fn get_sandbox_info(&self, sandbox_id: &str) -> Result<SandboxInfo> {
        let details = self.lookup(sandbox_id)?;
        Ok(self.to_info(&details))
    }

    fn is_sandbox_running(&self, sandbox_id: &str) -> Result<bool> {
        Ok(self
            .find(sandbox_id)?
            .is_some_and(|d| d.state.status == "running"))
    }

    fn kill_sandbox(&self, sandbox_id: &str) -> Result<bool> {
        let Some(details) = self.find(sandbox_id)? else {
            return Ok(false);
        };

        if details.state.running
            && let Err(e) = self.runtime.stop(sandbox_id, STOP_GRACE)
        {
            warn!(sandbox_id, error = %e, "container:stop failed, forcing removal");
        }
        if let Err(e) = self.runtime.remove(sandbox_id) {
            warn!(sandbox_id, error = %e, "container:remove failed");
            return Ok(false);
        }
        if self.cleanup_workspace {
            self.remove_workspace(sandbox_id);
        }

        info!(sandbox_id, "container:sandbox killed");
        Ok(true)
    }

    fn pause_sandbox(&self, sandbox_id: &str) -> Result<bool> {
        self.lookup(sandbox_id)?;
        match self.runtime.pause(sandbox_id) {
            Ok(()) => {
                info!(sandbox_id, "container:sandbox paused");
                Ok(true)
            }
            Err(e) => {
                warn!(sandbox_id, error = %e, "container:pause failed");
                Ok(false)
            }
        }
    }

    fn resume_sandbox(&self, sandbox_id: &str) -> Result<bool> {
        self.lookup(sandbox_id)?;
        match self.runtime.unpause(sandbox_id) {
            Ok(()) => {
                info!(sandbox_id, "container:sandbox resumed");
                Ok(true)
            }
            Err(e) => {
                warn!(sandbox_id, error = %e, "container:resume failed");
                Ok(false)
            }
        }
    }

    fn list_sandboxes(&self, limit: usize) -> Result<Vec<SandboxInfo>> {
        let label = format!("{}={}", LABEL_CREATED_BY, CREATED_BY);
        let ids = self
            .runtime
            .list_labeled(&label)
            .map_err(SandboxError::exec)?;

        let mut sandboxes = Vec::with_capacity(ids.len());
        for id in ids {
            // Containers can disappear between `ps` and `inspect`.
            match self.runtime.inspect(&id) {
                Ok(Some(details)) if details.label(LABEL_SANDBOX_ID).is_some() => {
                    sandboxes.push(self.to_info(&details));
                }
                Ok(_) => {}
                Err(e) => warn!(container = %id, error = %e, "container:inspect failed"),
            }
        }
        sandboxes.sort_by(|a, b| {
            (a.created_at.as_str(), a.sandbox_id.as_str())
                .cmp(&(b.created_at.as_str(), b.sandbox_id.as_str()))
        });
        sandboxes.truncate(limit);
        Ok(sandboxes)
    }

    fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult> {
        if let Some(key) = first_invalid_env_key(&options.envs) {
            return Err(SandboxError::CommandExecution(format!(
                "invalid environment variable name: {}",
                key
            )));
        }
        self.lookup_running(sandbox_id)?;

        let workdir = options
            .cwd
            .as_deref()
            .map(|cwd| self.container_path(cwd))
            .unwrap_or_else(|| self.mount_point.clone());
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.timeouts.default_command());
        let argv: Vec<&str> = if options.shell {
            vec!["/bin/sh", "-c", command]
        } else {
            command.split_whitespace().collect()
        };
        if argv.is_empty() {
            return Err(SandboxError::CommandExecution("empty command".to_string()));
        }
        let capped = capped_argv(timeout, &argv);
        let capped: Vec<&str> = capped.iter().map(String::as_str).collect();

        let started = Instant::now();
        let output = self
            .runtime
            .exec(
                sandbox_id,
                &workdir,
                &options.envs,
                &capped,
                timeout + EXEC_CLIENT_GRACE,
            )
            .map_err(SandboxError::exec)?;

        let exit_code = if hit_limit(&output, started.elapsed(), timeout) {
            if output.timed_out {
                warn!(
                    sandbox_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "container:exec client timed out, command may still be running"
                );
            } else {
                warn!(
                    sandbox_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "container:command timed out"
                );
            }
            CommandResult::TIMED_OUT
        } else {
            output.code.ok_or_else(|| {
                SandboxError::CommandExecution(format!(
                    "{} exec client was terminated by a signal",
                    self.runtime.binary()
                ))
            })?
        };
        debug!(sandbox_id, exit_code, "container:command finished");

        Ok(CommandResult {
            stdout: output.stdout_lossy().trim().to_string(),
            stderr: output.stderr_lossy().trim().to_string(),
            exit_code,
            pid: None,
        })
    }

    fn run_command_background(
        &self,
        sandbox_id: &str,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult> {
        let wrapped = format!(
            "nohup sh -c {} > /dev/null 2>&1 & echo $!",
            shell_quote(command)
        );
        let options = CommandOptions {
            shell: true,
            ..options.clone()
        };
        let mut result = self.run_command(sandbox_id, &wrapped, &options)?;
        if result.exit_code != 0 {
            return Err(SandboxError::CommandExecution(format!(
                "failed to start background command: {}",
                result.stderr
            )));
        }
        let pid = result.stdout.trim().to_string();
        result.pid = (!pid.is_empty()).then_some(pid);
        result.stdout.clear();
        Ok(result)
    }

    fn list_files(&self, sandbox_id: &str, path: &str, depth: usize) -> Result<Vec<FileInfo>> {
        let target = self.container_path(path);
        if depth == 0 {
            self.lookup(sandbox_id)?;
            return Ok(Vec::new());
        }
        let max_depth = depth.to_string();
        let output = self.exec_file_op(
            sandbox_id,
            &[
                "find",
                &target,
                "-mindepth",
                "1",
                "-maxdepth",
                &max_depth,
                "-printf",
                listing::FIND_FORMAT,
            ],
        )?;
        if !output.success() {
            let stderr = output.stderr_lossy();
            if stderr.contains("No such file") {
                return Ok(Vec::new());
            }
            return Err(file_op_failure("list", &target, &output));
        }
        Ok(listing::parse_find_output(&output.stdout_lossy()))
    }

    fn read_file_bytes(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>> {
        self.lookup(sandbox_id)?;
        let target = self.container_path(path);
        let tar = self
            .runtime
            .copy_from(sandbox_id, &target)
            .map_err(SandboxError::file)?;
        archive::unpack_single_file(&tar)
            .map_err(|e| SandboxError::FileOperation(format!("{}: {:#}", target, e)))
    }

    fn write_file_bytes(
        &self,
        sandbox_id: &str,
        path: &str,
        content: &[u8],
    ) -> Result<FileInfo> {
        let target = self.container_path(path);
        let (dir, name) = match target.rsplit_once('/') {
            Some((dir, name)) if !name.is_empty() => (if dir.is_empty() { "/" } else { dir }, name),
            _ => {
                return Err(SandboxError::FileOperation(format!(
                    "not a file path: {}",
                    target
                )));
            }
        };

        let mkdir = self.exec_file_op(sandbox_id, &["mkdir", "-p", dir])?;
        if !mkdir.success() {
            return Err(file_op_failure("mkdir", dir, &mkdir));
        }

        let tar = archive::pack_single_file(name, content).map_err(SandboxError::file)?;
        self.runtime
            .copy_to(sandbox_id, dir, &tar)
            .map_err(SandboxError::file)?;
        debug!(sandbox_id, path = %target, bytes = content.len(), "container:wrote file");
        self.get_file_info(sandbox_id, &target)
    }

    fn file_exists(&self, sandbox_id: &str, path: &str) -> Result<bool> {
        let target = self.container_path(path);
        Ok(self
            .exec_file_op(sandbox_id, &["test", "-e", &target])?
            .success())
    }

    fn get_file_info(&self, sandbox_id: &str, path: &str) -> Result<FileInfo> {
        let target = self.container_path(path);
        let output =
            self.exec_file_op(sandbox_id, &["stat", "-c", listing::STAT_FORMAT, &target])?;
        if !output.success() {
            return Err(file_op_failure("stat", &target, &output));
        }
        listing::parse_stat_output(&output.stdout_lossy()).ok_or_else(|| {
            SandboxError::FileOperation(format!("unexpected stat output for {}", target))
        })
    }

    fn remove_file(&self, sandbox_id: &str, path: &str) -> Result<()> {
        if !self.file_exists(sandbox_id, path)? {
            return Err(SandboxError::FileOperation(format!(
                "no such file or directory: {}",
                self.container_path(path)
            )));
        }
        let target = self.container_path(path);
        let output = self.exec_file_op(sandbox_id, &["rm", "-rf", &target])?;
        if !output.success() {
            return Err(file_op_failure("remove", &target, &output));
        }
        Ok(())
    }

    fn make_directory(&self, sandbox_id: &str, path: &str) -> Result<bool> {
        let target = self.container_path(path);
        let output = self.exec_file_op(sandbox_id, &["mkdir", "-p", &target])?;
        if !output.success() {
            warn!(sandbox_id, path = %target, stderr = %output.stderr_lossy().trim(), "container:mkdir failed");
        }
        Ok(output.success())
    }

    fn rename_file(&self, sandbox_id: &str, old_path: &str, new_path: &str) -> Result<FileInfo> {
        let from = self.container_path(old_path);
        let to = self.container_path(new_path);
        let parent = match to.rsplit_once('/') {
            Some(("", _)) | None => "/".to_string(),
            Some((dir, _)) => dir.to_string(),
        };
        let script = format!(
            "mkdir -p {} && mv {} {}",
            shell_quote(&parent),
            shell_quote(&from),
            shell_quote(&to)
        );
        let output = self.exec_file_op(sandbox_id, &["/bin/sh", "-c", &script])?;
        if !output.success() {
            return Err(file_op_failure("rename", &from, &output));
        }
        self.get_file_info(sandbox_id, &to)
    }

    fn get_host(&self, sandbox_id: &str, port: u16) -> Result<String> {
        self.lookup(sandbox_id)?;
        match self.runtime.port(sandbox_id, port) {
            Ok(Some(url)) => Ok(url),
            Ok(None) => Ok(format!("http://localhost:{}", port)),
            Err(e) => {
                debug!(sandbox_id, port, error = %e, "container:port lookup failed");
                Ok(format!("http://localhost:{}", port))
            }
        }
    }

    fn health_check(&self) -> HealthReport {
        let info = match self.runtime.info() {
            Ok(info) => info,
            Err(e) => return HealthReport::unhealthy(KIND, e),
        };
        let (version, counters) = summarize_info(&info);
        let mut report = HealthReport::healthy(KIND, version.unwrap_or_default())
            .with_detail("runtime", self.runtime.binary());
        report.details.extend(counters);

        let label = format!("{}={}", LABEL_CREATED_BY, CREATED_BY);
        if let Ok(ids) = self.runtime.list_labeled(&label) {
            report = report.with_detail("sandboxes", ids.len());
        }
        report
    }
}
