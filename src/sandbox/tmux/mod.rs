//! Sandboxes as tmux sessions on the host.
//!
//! One sandbox is one detached session whose shell starts in a plain host
//! directory. Commands are typed into the session; completion, exit status
//! and output are recovered through the capture-file protocol in
//! [`protocol`]. This backend is observable but not isolated: commands run
//! with the user's privileges on the host.

mod multiplexer;
mod protocol;
mod store;
mod workspace;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{Settings, TimeoutConfig};
use crate::shell::{export_clause, first_invalid_env_key};

use super::ids::unused_sandbox_id;
use super::{
    BackendKind, Capabilities, CommandOptions, CommandResult, CreateOptions, FileInfo,
    HealthReport, Result, SandboxBackend, SandboxError, SandboxInfo, SandboxStatus, now_rfc3339,
};

pub use multiplexer::{Multiplexer, TmuxCli};
use protocol::{CommandLine, Completion, ExitMarker, wait_for_completion};
pub use store::{SessionRecord, SessionStore};

const KIND: BackendKind = BackendKind::Tmux;

pub struct TmuxBackend {
    mux: Box<dyn Multiplexer>,
    store: SessionStore,
    workspace_root: PathBuf,
    shell: String,
    cleanup_workspace: bool,
    poll_interval: Duration,
    timeouts: TimeoutConfig,
    /// One foreground lock per sandbox; a terminal runs one command at a time.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TmuxBackend {
    /// Build a backend talking to the real tmux. Fails if tmux is not installed.
    pub fn new(settings: &Settings) -> Result<Self> {
        which::which("tmux")
            .map_err(|_| SandboxError::Creation("tmux not found in PATH".to_string()))?;
        let mux = TmuxCli::new(settings.tmux.socket_name());
        Self::with_multiplexer(settings, Box::new(mux))
    }

    /// Build a backend on top of any [`Multiplexer`].
    pub fn with_multiplexer(settings: &Settings, mux: Box<dyn Multiplexer>) -> Result<Self> {
        let workspace_root = settings.tmux.workspace_dir();
        fs::create_dir_all(&workspace_root).map_err(|e| {
            SandboxError::Configuration(format!(
                "cannot create workspace directory {}: {}",
                workspace_root.display(),
                e
            ))
        })?;
        let store = SessionStore::open(settings.tmux.capture_dir()).map_err(SandboxError::config)?;

        let backend = Self {
            mux,
            store,
            workspace_root,
            shell: settings.tmux.shell().to_string(),
            cleanup_workspace: settings.tmux.cleanup_workspace(),
            poll_interval: settings.tmux.poll_interval(),
            timeouts: settings.timeouts.clone(),
            locks: Mutex::new(HashMap::new()),
        };
        backend.reconcile()?;
        Ok(backend)
    }

    /// Discard side files whose session no longer exists. Returns how many
    /// were discarded.
    pub fn reconcile(&self) -> Result<usize> {
        let live: HashSet<String> = self
            .mux
            .list_sessions()
            .map_err(SandboxError::exec)?
            .into_iter()
            .collect();

        let mut discarded = 0;
        for id in self.store.ids().map_err(SandboxError::file)? {
            if live.contains(&id) {
                continue;
            }
            match self.store.remove(&id) {
                Ok(()) => {
                    info!(sandbox_id = %id, "tmux:discarded orphaned side file");
                    discarded += 1;
                }
                Err(e) => warn!(sandbox_id = %id, error = %e, "tmux:failed to discard side file"),
            }
        }
        Ok(discarded)
    }

    fn default_workspace(&self, sandbox_id: &str) -> PathBuf {
        self.workspace_root.join(sandbox_id)
    }

    /// The record of a live sandbox, or `NotFound`.
    fn require(&self, sandbox_id: &str) -> Result<SessionRecord> {
        if !KIND.owns_id(sandbox_id) || !self.mux.has_session(sandbox_id).map_err(SandboxError::exec)? {
            return Err(SandboxError::NotFound(sandbox_id.to_string()));
        }
        Ok(self.record_or_default(sandbox_id))
    }

    /// Side-file contents for a live session. A missing or unreadable side
    /// file yields a minimal record rather than hiding the session.
    fn record_or_default(&self, sandbox_id: &str) -> SessionRecord {
        match self.store.load(sandbox_id) {
            Ok(Some(record)) => return record,
            Ok(None) => debug!(sandbox_id, "tmux:session has no side file"),
            Err(e) => warn!(sandbox_id, error = %e, "tmux:unreadable side file"),
        }
        SessionRecord {
            sandbox_id: sandbox_id.to_string(),
            workspace: self.default_workspace(sandbox_id),
            created_at: String::new(),
            template: None,
            timeout: None,
            metadata: BTreeMap::new(),
            envs: BTreeMap::new(),
        }
    }

    fn to_info(record: SessionRecord) -> SandboxInfo {
        SandboxInfo {
            sandbox_id: record.sandbox_id,
            backend: KIND,
            status: SandboxStatus::Running,
            created_at: record.created_at,
            template: record.template,
            metadata: record.metadata,
            ports: None,
            timeout: record.timeout,
        }
    }

    fn lock_for(&self, sandbox_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(sandbox_id.to_string()).or_default().clone()
    }

    /// Best-effort teardown of a half-created sandbox.
    fn abandon(&self, sandbox_id: &str, workspace: &Path) {
        if let Err(e) = self.mux.kill_session(sandbox_id) {
            warn!(sandbox_id, error = %e, "tmux:failed to kill session while unwinding");
        }
        if let Err(e) = fs::remove_dir_all(workspace)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(sandbox_id, error = %e, "tmux:failed to remove workspace while unwinding");
        }
        if let Err(e) = self.store.remove(sandbox_id) {
            warn!(sandbox_id, error = %e, "tmux:failed to remove side file while unwinding");
        }
    }

    /// Session variables overlaid with per-call ones, as an `export` clause.
    fn exports(record: &SessionRecord, options: &CommandOptions) -> Result<Option<String>> {
        if let Some(key) = first_invalid_env_key(&options.envs) {
            return Err(SandboxError::CommandExecution(format!(
                "invalid environment variable name: {}",
                key
            )));
        }
        let mut envs = record.envs.clone();
        envs.extend(options.envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(export_clause(&envs))
    }

    fn command_dir(record: &SessionRecord, options: &CommandOptions) -> Result<String> {
        let dir = match options.cwd.as_deref() {
            Some(cwd) => workspace::resolve_cwd(&record.workspace, cwd)?,
            None => record.workspace.clone(),
        };
        Ok(dir.to_string_lossy().into_owned())
    }

    fn host_path(&self, sandbox_id: &str, path: &str) -> Result<PathBuf> {
        let record = self.require(sandbox_id)?;
        workspace::resolve(&record.workspace, path)
    }

    fn remove_capture(&self, capture: &Path) {
        if let Err(e) = fs::remove_file(capture)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %capture.display(), error = %e, "tmux:failed to remove capture file");
        }
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> SandboxError {
    if err.kind() == ErrorKind::NotFound {
        SandboxError::FileOperation(format!("no such file or directory: {}", path.display()))
    } else {
        SandboxError::FileOperation(format!("failed to {} {}: {}", action, path.display(), err))
    }
}

impl SandboxBackend for TmuxBackend {
    fn name(&self) -> &'static str {
        KIND.name()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            separate_stderr: false,
            pause: false,
            background_pid: false,
            isolated: false,
        }
    }

    fn create_sandbox(&self, options: &CreateOptions) -> Result<String> {
        if let Some(key) = first_invalid_env_key(&options.envs) {
            return Err(SandboxError::Creation(format!(
                "invalid environment variable name: {}",
                key
            )));
        }

        let sandbox_id = unused_sandbox_id(KIND, |id| {
            Ok(self.store.contains(id) || self.mux.has_session(id).map_err(SandboxError::creation)?)
        })?;
        let workspace = self.default_workspace(&sandbox_id);
        fs::create_dir_all(&workspace).map_err(|e| {
            SandboxError::Creation(format!(
                "cannot create workspace {}: {}",
                workspace.display(),
                e
            ))
        })?;

        if let Err(e) = self.mux.new_session(&sandbox_id, &workspace, &self.shell) {
            self.abandon(&sandbox_id, &workspace);
            return Err(SandboxError::creation(e));
        }

        for (key, value) in &options.envs {
            if let Err(e) = self.mux.set_environment(&sandbox_id, key, value) {
                self.abandon(&sandbox_id, &workspace);
                return Err(SandboxError::creation(e));
            }
        }

        let record = SessionRecord {
            sandbox_id: sandbox_id.clone(),
            workspace: workspace.clone(),
            created_at: now_rfc3339(),
            template: options.template.clone(),
            timeout: Some(self.timeouts.sandbox_timeout(options.timeout)),
            metadata: options.metadata.clone(),
            envs: options.envs.clone(),
        };
        if let Err(e) = self.store.save(&record) {
            self.abandon(&sandbox_id, &workspace);
            return Err(SandboxError::creation(e));
        }

        info!(
            sandbox_id = %sandbox_id,
            workspace = %workspace.display(),
            template = ?options.template,
            "tmux:sandbox created"
        );
        Ok(sandbox_id)
    }

    fn connect_sandbox(&self, sandbox_id: &str) -> Result<SandboxInfo> {
        let record = self.require(sandbox_id)?;
        debug!(sandbox_id, "tmux:connected");
        Ok(Self::to_info(record))
    }

    fn get_sandbox_info(&self, sandbox_id: &str) -> Result<SandboxInfo> {
        self.require(sandbox_id).map(Self::to_info)
    }

    fn is_sandbox_running(&self, sandbox_id: &str) -> Result<bool> {
        if !KIND.owns_id(sandbox_id) {
            return Ok(false);
        }
        self.mux.has_session(sandbox_id).map_err(SandboxError::exec)
    }

    fn kill_sandbox(&self, sandbox_id: &str) -> Result<bool> {
        if !KIND.owns_id(sandbox_id) {
            return Ok(false);
        }

        let killed = self
            .mux
            .kill_session(sandbox_id)
            .map_err(SandboxError::exec)?;
        let record = self.store.load(sandbox_id).ok().flatten();
        if !killed && record.is_none() {
            return Ok(false);
        }

        if self.cleanup_workspace {
            let workspace = record
                .as_ref()
                .map(|r| r.workspace.clone())
                .unwrap_or_else(|| self.default_workspace(sandbox_id));
            if let Err(e) = fs::remove_dir_all(&workspace)
                && e.kind() != ErrorKind::NotFound
            {
                warn!(sandbox_id, error = %e, "tmux:failed to remove workspace");
            }
        }
        if let Err(e) = self.store.remove(sandbox_id) {
            warn!(sandbox_id, error = %e, "tmux:failed to remove side file");
        }
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(sandbox_id);

        info!(sandbox_id, killed, "tmux:sandbox killed");
        Ok(killed)
    }

    fn pause_sandbox(&self, sandbox_id: &str) -> Result<bool> {
        self.require(sandbox_id)?;
        debug!(sandbox_id, "tmux:pause not supported");
        Ok(false)
    }

    fn resume_sandbox(&self, sandbox_id: &str) -> Result<bool> {
        self.require(sandbox_id)?;
        debug!(sandbox_id, "tmux:resume not supported");
        Ok(false)
    }

    fn list_sandboxes(&self, limit: usize) -> Result<Vec<SandboxInfo>> {
        let mut sandboxes: Vec<SandboxInfo> = self
            .mux
            .list_sessions()
            .map_err(SandboxError::exec)?
            .into_iter()
            .filter(|name| KIND.owns_id(name))
            .map(|id| Self::to_info(self.record_or_default(&id)))
            .collect();
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
        let record = self.require(sandbox_id)?;
        let exports = Self::exports(&record, options)?;
        let cwd = Self::command_dir(&record, options)?;
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.timeouts.default_command());

        let lock = self.lock_for(sandbox_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // A timed-out line keeps running in the session and may still write
        // to its capture, so every invocation gets a file of its own.
        let marker = ExitMarker::generate().map_err(SandboxError::exec)?;
        let capture = self.store.capture_path(sandbox_id, marker.token());
        fs::write(&capture, b"").map_err(|e| {
            SandboxError::CommandExecution(format!(
                "cannot create capture file {}: {}",
                capture.display(),
                e
            ))
        })?;
        let line = CommandLine {
            cwd: &cwd,
            exports: exports.as_deref(),
            command,
        }
        .foreground(&capture, &marker);

        debug!(sandbox_id, command, cwd, timeout_ms = timeout.as_millis() as u64, "tmux:run");
        if let Err(e) = self.mux.send_keys(sandbox_id, &line) {
            self.remove_capture(&capture);
            return Err(SandboxError::exec(e));
        }

        let completion =
            wait_for_completion(&capture, &marker.marker(), timeout, self.poll_interval);
        self.remove_capture(&capture);

        match completion.map_err(SandboxError::exec)? {
            Completion::Finished { output, exit_code } => {
                debug!(sandbox_id, exit_code, "tmux:command finished");
                Ok(CommandResult {
                    stdout: output,
                    stderr: String::new(),
                    exit_code,
                    pid: None,
                })
            }
            Completion::TimedOut { partial } => {
                warn!(
                    sandbox_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "tmux:command timed out, left running in session"
                );
                Ok(CommandResult {
                    stdout: partial,
                    stderr: String::new(),
                    exit_code: CommandResult::TIMED_OUT,
                    pid: None,
                })
            }
        }
    }

    fn run_command_background(
        &self,
        sandbox_id: &str,
        command: &str,
        options: &CommandOptions,
    ) -> Result<CommandResult> {
        let record = self.require(sandbox_id)?;
        let exports = Self::exports(&record, options)?;
        let cwd = Self::command_dir(&record, options)?;

        let lock = self.lock_for(sandbox_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let line = CommandLine {
            cwd: &cwd,
            exports: exports.as_deref(),
            command,
        }
        .background();
        debug!(sandbox_id, command, cwd, "tmux:run background");
        self.mux
            .send_keys(sandbox_id, &line)
            .map_err(SandboxError::exec)?;

        Ok(CommandResult::default())
    }

    fn list_files(&self, sandbox_id: &str, path: &str, depth: usize) -> Result<Vec<FileInfo>> {
        let dir = self.host_path(sandbox_id, path)?;
        match fs::metadata(&dir) {
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("stat", &dir, e)),
            Ok(meta) if !meta.is_dir() => {
                return Err(SandboxError::FileOperation(format!(
                    "not a directory: {}",
                    dir.display()
                )));
            }
            Ok(_) => {}
        }
        workspace::list_dir(&dir, depth).map_err(|e| io_error("list", &dir, e))
    }

    fn read_file_bytes(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>> {
        let file = self.host_path(sandbox_id, path)?;
        fs::read(&file).map_err(|e| io_error("read", &file, e))
    }

    fn write_file_bytes(
        &self,
        sandbox_id: &str,
        path: &str,
        content: &[u8],
    ) -> Result<FileInfo> {
        let file = self.host_path(sandbox_id, path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("create", parent, e))?;
        }
        fs::write(&file, content).map_err(|e| io_error("write", &file, e))?;
        debug!(sandbox_id, path = %file.display(), bytes = content.len(), "tmux:wrote file");
        workspace::file_info(&file).map_err(|e| io_error("stat", &file, e))
    }

    fn file_exists(&self, sandbox_id: &str, path: &str) -> Result<bool> {
        let file = self.host_path(sandbox_id, path)?;
        Ok(fs::symlink_metadata(file).is_ok())
    }

    fn get_file_info(&self, sandbox_id: &str, path: &str) -> Result<FileInfo> {
        let file = self.host_path(sandbox_id, path)?;
        workspace::file_info(&file).map_err(|e| io_error("stat", &file, e))
    }

    fn remove_file(&self, sandbox_id: &str, path: &str) -> Result<()> {
        let target = self.host_path(sandbox_id, path)?;
        let meta = fs::symlink_metadata(&target).map_err(|e| io_error("stat", &target, e))?;
        if meta.is_dir() {
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        }
        .map_err(|e| io_error("remove", &target, e))
    }

    fn make_directory(&self, sandbox_id: &str, path: &str) -> Result<bool> {
        let dir = self.host_path(sandbox_id, path)?;
        match fs::create_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(sandbox_id, path = %dir.display(), error = %e, "tmux:mkdir failed");
                Ok(false)
            }
        }
    }

    fn rename_file(&self, sandbox_id: &str, old_path: &str, new_path: &str) -> Result<FileInfo> {
        let record = self.require(sandbox_id)?;
        let from = workspace::resolve(&record.workspace, old_path)?;
        let to = workspace::resolve(&record.workspace, new_path)?;

        fs::symlink_metadata(&from).map_err(|e| io_error("stat", &from, e))?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("create", parent, e))?;
        }
        fs::rename(&from, &to).map_err(|e| io_error("rename", &from, e))?;
        workspace::file_info(&to).map_err(|e| io_error("stat", &to, e))
    }

    fn get_host(&self, sandbox_id: &str, port: u16) -> Result<String> {
        self.require(sandbox_id)?;
        Ok(format!("http://localhost:{}", port))
    }

    fn health_check(&self) -> HealthReport {
        let version = match self.mux.version() {
            Ok(version) => version,
            Err(e) => return HealthReport::unhealthy(KIND, e),
        };
        let sessions = match self.mux.list_sessions() {
            Ok(sessions) => sessions,
            Err(e) => return HealthReport::unhealthy(KIND, e),
        };
        let active = sessions.iter().filter(|s| KIND.owns_id(s)).count();

        HealthReport::healthy(KIND, version)
            .with_detail("active_sessions", active)
            .with_detail("workspace_dir", self.workspace_root.display())
            .with_detail("capture_dir", self.store.dir().display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::Cmd;
    use std::sync::mpsc::{self, Sender};
    use std::thread;
    use std::time::Instant;

    /// Runs each typed line with `sh -c`, one at a time per session, the way a
    /// shell reading from a terminal would.
    #[derive(Default)]
    struct FakeMux {
        sessions: Mutex<HashMap<String, Sender<String>>>,
        envs: Mutex<Vec<(String, String, String)>>,
    }

    impl Multiplexer for FakeMux {
        fn version(&self) -> anyhow::Result<String> {
            Ok("fake 1.0".to_string())
        }

        fn new_session(&self, name: &str, cwd: &Path, _shell: &str) -> anyhow::Result<()> {
            let (tx, rx) = mpsc::channel::<String>();
            let cwd = cwd.to_string_lossy().into_owned();
            thread::spawn(move || {
                for line in rx {
                    let script = format!("cd '{}' && {{ {}\n}}", cwd, line);
                    let _ = Cmd::new("sh").args(&["-c", &script]).output();
                }
            });
            self.sessions.lock().unwrap().insert(name.to_string(), tx);
            Ok(())
        }

        fn has_session(&self, name: &str) -> anyhow::Result<bool> {
            Ok(self.sessions.lock().unwrap().contains_key(name))
        }

        fn kill_session(&self, name: &str) -> anyhow::Result<bool> {
            Ok(self.sessions.lock().unwrap().remove(name).is_some())
        }

        fn list_sessions(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.sessions.lock().unwrap().keys().cloned().collect())
        }

        fn set_environment(&self, name: &str, key: &str, value: &str) -> anyhow::Result<()> {
            self.envs
                .lock()
                .unwrap()
                .push((name.to_string(), key.to_string(), value.to_string()));
            Ok(())
        }

        fn send_keys(&self, name: &str, line: &str) -> anyhow::Result<()> {
            let sessions = self.sessions.lock().unwrap();
            let tx = sessions
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("can't find session: {}", name))?;
            tx.send(line.to_string())?;
            Ok(())
        }
    }

    fn settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.tmux.workspace_dir = Some(dir.join("ws").to_string_lossy().into_owned());
        settings.tmux.capture_dir = Some(dir.join("cap").to_string_lossy().into_owned());
        settings.tmux.poll_interval_ms = Some(10);
        settings.timeouts.default_command = Some(10);
        settings
    }

    fn backend(dir: &Path) -> TmuxBackend {
        TmuxBackend::with_multiplexer(&settings(dir), Box::new(FakeMux::default())).unwrap()
    }

    fn run(backend: &TmuxBackend, id: &str, command: &str) -> CommandResult {
        backend
            .run_command(id, command, &CommandOptions::default())
            .unwrap()
    }

    #[test]
    fn echo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();
        assert!(id.starts_with("sbx_tmx_"));

        let result = run(&backend, &id, "echo hello world");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello world");
        assert!(result.stderr.is_empty());
        assert!(backend.store.captures(&id).unwrap().is_empty());
    }

    #[test]
    fn exit_code_and_merged_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();

        let result = run(&backend, &id, "echo out; echo err >&2; exit 7");
        assert_eq!(result.exit_code, 7);
        assert!(result.stdout.contains("out"));
        assert!(result.stdout.contains("err"));
        assert_eq!(result.stderr, "");
    }

    #[test]
    fn quoting_survives_typing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();

        let result = run(&backend, &id, r#"printf '%s|%s\n' "it's" '$HOME'"#);
        assert_eq!(result.stdout, "it's|$HOME");
    }

    #[test]
    fn session_and_call_envs_are_exported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let options = CreateOptions {
            envs: BTreeMap::from([
                ("SESSION_VAR".to_string(), "from session".to_string()),
                ("SHADOWED".to_string(), "old".to_string()),
            ]),
            ..Default::default()
        };
        let id = backend.create_sandbox(&options).unwrap();

        let call = CommandOptions::default().with_env("SHADOWED", "new");
        let result = backend
            .run_command(&id, "echo \"$SESSION_VAR/$SHADOWED\"", &call)
            .unwrap();
        assert_eq!(result.stdout, "from session/new");
    }

    #[test]
    fn invalid_env_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let bad = CreateOptions {
            envs: BTreeMap::from([("NOT VALID".to_string(), "x".to_string())]),
            ..Default::default()
        };
        assert!(matches!(
            backend.create_sandbox(&bad),
            Err(SandboxError::Creation(_))
        ));

        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();
        let call = CommandOptions::default().with_env("1BAD", "x");
        assert!(matches!(
            backend.run_command(&id, "true", &call),
            Err(SandboxError::CommandExecution(_))
        ));
    }

    #[test]
    fn cwd_is_translated_into_the_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();
        assert!(backend.make_directory(&id, "/workspace/sub").unwrap());

        let opts = CommandOptions::default().with_cwd("/workspace/sub");
        let result = backend.run_command(&id, "pwd", &opts).unwrap();
        assert!(result.stdout.ends_with(&format!("{}/sub", id)));

        let result = run(&backend, &id, "pwd");
        assert!(result.stdout.ends_with(&id));
    }

    #[test]
    fn timeout_returns_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();

        let opts = CommandOptions::default().with_timeout(Duration::from_millis(300));
        let started = Instant::now();
        let result = backend
            .run_command(&id, "echo started; sleep 3", &opts)
            .unwrap();

        assert!(result.timed_out());
        assert_eq!(result.stdout, "started");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn timed_out_calls_do_not_leak_into_later_output() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();
        let short = CommandOptions::default().with_timeout(Duration::from_millis(200));

        assert!(backend.run_command(&id, "sleep 1", &short).unwrap().timed_out());
        let second = backend
            .run_command(&id, "echo leaked-from-second; sleep 3", &short)
            .unwrap();
        assert!(second.timed_out());

        // The session runs lines in order, so this waits behind both.
        let long = CommandOptions::default().with_timeout(Duration::from_secs(8));
        let third = backend.run_command(&id, "echo mine", &long).unwrap();
        assert_eq!(third.exit_code, 0);
        assert_eq!(third.stdout, "mine");

        assert!(backend.kill_sandbox(&id).unwrap());
        assert!(backend.store.captures(&id).unwrap().is_empty());
    }

    #[test]
    fn back_to_back_commands_do_not_mix() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();

        for i in 0..5 {
            let result = run(&backend, &id, &format!("echo run-{i}; exit {i}"));
            assert_eq!(result.stdout, format!("run-{i}"));
            assert_eq!(result.exit_code, i);
        }
    }

    #[test]
    fn concurrent_commands_on_one_sandbox_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(backend(dir.path()));
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let backend = Arc::clone(&backend);
                let id = id.clone();
                thread::spawn(move || {
                    let result = run(&backend, &id, &format!("sleep 0.05; echo worker-{i}"));
                    (i, result)
                })
            })
            .collect();

        for handle in handles {
            let (i, result) = handle.join().unwrap();
            assert_eq!(result.stdout, format!("worker-{i}"));
            assert_eq!(result.exit_code, 0);
        }
    }

    #[test]
    fn kill_is_final() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();
        assert!(backend.is_sandbox_running(&id).unwrap());

        assert!(backend.kill_sandbox(&id).unwrap());
        assert!(!backend.kill_sandbox(&id).unwrap());
        assert!(!backend.is_sandbox_running(&id).unwrap());
        assert!(backend.get_sandbox_info(&id).unwrap_err().is_not_found());
        assert!(
            backend
                .run_command(&id, "true", &CommandOptions::default())
                .unwrap_err()
                .is_not_found()
        );
        assert!(!backend.store.contains(&id));
    }

    #[test]
    fn cleanup_workspace_on_kill() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.tmux.cleanup_workspace = Some(true);
        let backend =
            TmuxBackend::with_multiplexer(&settings, Box::new(FakeMux::default())).unwrap();
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();
        let workspace = backend.default_workspace(&id);
        assert!(workspace.is_dir());

        backend.kill_sandbox(&id).unwrap();
        assert!(!workspace.exists());
    }

    #[test]
    fn unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        for id in ["sbx_tmx_000000000000", "sbx_ctr_000000000000", "main"] {
            assert!(!backend.is_sandbox_running(id).unwrap());
            assert!(!backend.kill_sandbox(id).unwrap());
            assert!(backend.get_sandbox_info(id).unwrap_err().is_not_found());
            assert!(backend.pause_sandbox(id).unwrap_err().is_not_found());
            assert!(backend.read_file(id, "x").unwrap_err().is_not_found());
            assert!(backend.get_host(id, 80).unwrap_err().is_not_found());
        }
    }

    #[test]
    fn info_reflects_create_options() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let options = CreateOptions {
            template: Some("python".to_string()),
            timeout: Some(99_999),
            metadata: BTreeMap::from([("owner".to_string(), "ci".to_string())]),
            ..Default::default()
        };
        let id = backend.create_sandbox(&options).unwrap();

        let info = backend.connect_sandbox(&id).unwrap();
        assert_eq!(info.backend, BackendKind::Tmux);
        assert_eq!(info.status, SandboxStatus::Running);
        assert_eq!(info.template.as_deref(), Some("python"));
        assert_eq!(info.metadata["owner"], "ci");
        assert_eq!(info.timeout, Some(7200));
        assert!(!info.created_at.is_empty());

        assert!(!backend.pause_sandbox(&id).unwrap());
        assert!(!backend.resume_sandbox(&id).unwrap());
        assert_eq!(backend.get_host(&id, 8080).unwrap(), "http://localhost:8080");
    }

    #[test]
    fn file_operations() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();

        let written = backend
            .write_file(&id, "/workspace/src/app.py", "print('hi')\n")
            .unwrap();
        assert_eq!(written.name, "app.py");
        assert_eq!(written.size, 12);
        assert!(!written.is_dir());
        assert!(written.path.ends_with("src/app.py"));
        assert_eq!(
            backend.read_file(&id, "src/app.py").unwrap(),
            "print('hi')\n"
        );

        let binary: Vec<u8> = (0..=255).collect();
        let written = backend.write_file_bytes(&id, "/data.bin", &binary).unwrap();
        assert_eq!(written.size, 256);
        assert_eq!(backend.read_file_bytes(&id, "data.bin").unwrap(), binary);
        assert!(
            backend
                .read_file(&id, "data.bin")
                .unwrap_err()
                .to_string()
                .contains("UTF-8")
        );

        assert!(backend.file_exists(&id, "/workspace/src").unwrap());
        assert!(!backend.file_exists(&id, "/workspace/nope").unwrap());

        let info = backend.get_file_info(&id, "/workspace/src/app.py").unwrap();
        assert_eq!(info.name, "app.py");
        assert_eq!(info.size, 12);

        let listing = backend.list_files(&id, "/workspace", 1).unwrap();
        let names: Vec<_> = listing.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["data.bin", "src"]);
        assert!(backend.list_files(&id, "/workspace/missing", 1).unwrap().is_empty());

        let moved = backend
            .rename_file(&id, "src/app.py", "/workspace/lib/main.py")
            .unwrap();
        assert_eq!(moved.name, "main.py");
        assert!(!backend.file_exists(&id, "src/app.py").unwrap());

        backend.remove_file(&id, "lib").unwrap();
        assert!(!backend.file_exists(&id, "lib/main.py").unwrap());
        assert!(matches!(
            backend.remove_file(&id, "lib"),
            Err(SandboxError::FileOperation(_))
        ));
        assert!(matches!(
            backend.read_file(&id, "../../etc/passwd"),
            Err(SandboxError::FileOperation(_))
        ));
    }

    #[test]
    fn command_sees_written_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();

        backend.write_file(&id, "/workspace/note.txt", "shared").unwrap();
        assert_eq!(run(&backend, &id, "cat note.txt").stdout, "shared");
    }

    #[test]
    fn background_command_returns_without_pid() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = backend.create_sandbox(&CreateOptions::default()).unwrap();

        let result = backend
            .run_command_background(&id, "sleep 0.1; echo done > bg.txt", &CommandOptions::default())
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.pid, None);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !backend.file_exists(&id, "bg.txt").unwrap() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(backend.read_file(&id, "bg.txt").unwrap(), "done\n");
    }

    #[test]
    fn list_respects_limit_and_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mux = FakeMux::default();
        mux.new_session("someone-elses", dir.path(), "/bin/sh").unwrap();
        let backend = TmuxBackend::with_multiplexer(&settings(dir.path()), Box::new(mux)).unwrap();
        for _ in 0..3 {
            backend.create_sandbox(&CreateOptions::default()).unwrap();
        }

        assert_eq!(backend.list_sandboxes(10).unwrap().len(), 3);
        assert_eq!(backend.list_sandboxes(2).unwrap().len(), 2);
        assert!(backend.list_sandboxes(0).unwrap().is_empty());
    }

    #[test]
    fn reconcile_discards_orphaned_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let store = SessionStore::open(settings.tmux.capture_dir()).unwrap();
        store
            .save(&SessionRecord {
                sandbox_id: "sbx_tmx_deadbeef0000".to_string(),
                workspace: dir.path().join("ws/sbx_tmx_deadbeef0000"),
                created_at: "2026-01-01T00:00:00Z".to_string(),
                template: None,
                timeout: None,
                metadata: BTreeMap::new(),
                envs: BTreeMap::new(),
            })
            .unwrap();

        let backend =
            TmuxBackend::with_multiplexer(&settings, Box::new(FakeMux::default())).unwrap();
        assert!(!store.contains("sbx_tmx_deadbeef0000"));
        assert!(backend.list_sandboxes(10).unwrap().is_empty());
        assert!(
            backend
                .get_sandbox_info("sbx_tmx_deadbeef0000")
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn reap_kills_expired_sandboxes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let expired = backend
            .create_sandbox(&CreateOptions {
                timeout: Some(0),
                ..Default::default()
            })
            .unwrap();
        let fresh = backend.create_sandbox(&CreateOptions::default()).unwrap();

        assert_eq!(backend.reap_expired().unwrap(), vec![expired.clone()]);
        assert!(!backend.is_sandbox_running(&expired).unwrap());
        assert!(backend.is_sandbox_running(&fresh).unwrap());
    }

    #[test]
    fn health_counts_sandbox_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        backend.create_sandbox(&CreateOptions::default()).unwrap();

        let report = backend.health_check();
        assert!(report.is_healthy());
        assert_eq!(report.backend, "tmux");
        assert_eq!(report.version.as_deref(), Some("fake 1.0"));
        assert_eq!(report.details["active_sessions"], "1");
    }
}
