//! Container engine operations, and the docker/podman command line behind them.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

use crate::cmd::{Cmd, TimedOutput};
use crate::config::ContainerRuntime;

/// The parts of `inspect` output the backend reads.
///
/// Field names are shared by docker and podman.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDetails {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created: String,
    pub state: ContainerState,
    #[serde(default)]
    pub config: ContainerConfigDetails,
    #[serde(default)]
    pub network_settings: NetworkSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    pub status: String,
    #[serde(default)]
    pub running: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfigDetails {
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    /// `"8080/tcp"` -> host bindings (null when unpublished)
    #[serde(default)]
    pub ports: Option<HashMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    #[serde(rename = "HostPort", default)]
    pub host_port: String,
}

impl ContainerDetails {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.config.labels.as_ref()?.get(key).map(String::as_str)
    }

    /// Labels starting with `prefix`, with the prefix stripped.
    pub fn labels_with_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.config
            .labels
            .iter()
            .flatten()
            .filter_map(|(k, v)| Some((k.strip_prefix(prefix)?.to_string(), v.clone())))
            .collect()
    }

    /// Published container ports and the host address each is reachable on.
    pub fn published_ports(&self) -> BTreeMap<u16, String> {
        self.network_settings
            .ports
            .iter()
            .flatten()
            .filter_map(|(spec, bindings)| {
                let (port, proto) = spec.split_once('/').unwrap_or((spec.as_str(), "tcp"));
                if proto != "tcp" {
                    return None;
                }
                let port = port.parse().ok()?;
                let binding = bindings.as_ref()?.first()?;
                Some((port, host_url(&binding.host_ip, &binding.host_port)))
            })
            .collect()
    }
}

/// `http://host:port`, replacing wildcard bind addresses with localhost.
pub fn host_url(host_ip: &str, host_port: &str) -> String {
    let host = match host_ip.trim_matches(|c| c == '[' || c == ']') {
        "" | "0.0.0.0" | "::" => "localhost",
        _ => host_ip,
    };
    format!("http://{}:{}", host, host_port)
}

/// Parse one line of `port` output such as `127.0.0.1:8003` or `[::]:8003`.
pub fn parse_port_line(line: &str) -> Option<String> {
    let (host, port) = line.trim().rsplit_once(':')?;
    port.parse::<u16>().ok()?;
    Some(host_url(host, port))
}

fn is_no_such(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such") || lower.contains("not found")
}

/// Engine operations the container backend is built on.
///
/// Implementations must be Send + Sync; the backend shares one instance
/// across all sandboxes.
pub trait ContainerEngine: Send + Sync {
    /// Engine binary name, e.g. "docker"
    fn binary(&self) -> &str;

    /// Engine `info`. Fails when the daemon is unreachable.
    fn info(&self) -> Result<serde_json::Value>;

    fn image_exists(&self, image: &str) -> Result<bool>;

    /// Create and start a container from prepared `run` arguments; returns its id.
    fn run(&self, args: &[String]) -> Result<String>;

    /// `Ok(None)` when no such container exists.
    fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>>;

    /// Ids of all containers (running or not) carrying `label`.
    fn list_labeled(&self, label: &str) -> Result<Vec<String>>;

    fn start(&self, name: &str) -> Result<()>;

    fn stop(&self, name: &str, grace: Duration) -> Result<()>;

    fn remove(&self, name: &str) -> Result<()>;

    fn pause(&self, name: &str) -> Result<()>;

    fn unpause(&self, name: &str) -> Result<()>;

    /// Run `argv` in the container with separate output streams, giving up
    /// on the exec client after `timeout`.
    fn exec(
        &self,
        name: &str,
        workdir: &str,
        envs: &BTreeMap<String, String>,
        argv: &[&str],
        timeout: Duration,
    ) -> Result<TimedOutput>;

    /// Tar stream of `path` inside the container.
    fn copy_from(&self, name: &str, path: &str) -> Result<Vec<u8>>;

    /// Extract the tar stream `archive` into `dir` inside the container.
    fn copy_to(&self, name: &str, dir: &str, archive: &[u8]) -> Result<()>;

    /// Host URL of a published tcp port, if any.
    fn port(&self, name: &str, port: u16) -> Result<Option<String>>;
}

/// docker or podman driven through its command line.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeCli {
    binary: &'static str,
}

impl RuntimeCli {
    pub fn new(kind: ContainerRuntime) -> Self {
        Self {
            binary: kind.binary(),
        }
    }

    fn cmd<'a>(&self) -> Cmd<'a> {
        Cmd::new(self.binary)
    }
}

impl ContainerEngine for RuntimeCli {
    fn binary(&self) -> &str {
        self.binary
    }

    fn info(&self) -> Result<serde_json::Value> {
        let raw = self
            .cmd()
            .args(&["info", "--format", "{{json .}}"])
            .run_and_capture_stdout()
            .with_context(|| format!("{} info failed", self.binary))?;
        serde_json::from_str(&raw).with_context(|| format!("Unparseable {} info output", self.binary))
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        self.cmd()
            .args(&["image", "inspect", image])
            .run_as_check()
    }

    fn run(&self, args: &[String]) -> Result<String> {
        let mut refs: Vec<&str> = vec!["run"];
        refs.extend(args.iter().map(String::as_str));
        self.cmd().args(&refs).run_and_capture_stdout()
    }

    fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>> {
        let output = self
            .cmd()
            .args(&["inspect", "--type", "container", name])
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_no_such(&stderr) {
                return Ok(None);
            }
            return Err(anyhow!("{} inspect failed: {}", self.binary, stderr.trim()));
        }
        let mut details: Vec<ContainerDetails> = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Unparseable {} inspect output", self.binary))?;
        Ok(details.pop())
    }

    fn list_labeled(&self, label: &str) -> Result<Vec<String>> {
        let filter = format!("label={}", label);
        let output = self
            .cmd()
            .args(&["ps", "-aq", "--filter", &filter])
            .run_and_capture_stdout()?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn start(&self, name: &str) -> Result<()> {
        self.cmd().args(&["start", name]).run()?;
        Ok(())
    }

    fn stop(&self, name: &str, grace: Duration) -> Result<()> {
        let secs = grace.as_secs().to_string();
        self.cmd().args(&["stop", "-t", &secs, name]).run()?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.cmd().args(&["rm", "-f", name]).run()?;
        Ok(())
    }

    fn pause(&self, name: &str) -> Result<()> {
        self.cmd().args(&["pause", name]).run()?;
        Ok(())
    }

    fn unpause(&self, name: &str) -> Result<()> {
        self.cmd().args(&["unpause", name]).run()?;
        Ok(())
    }

    fn exec(
        &self,
        name: &str,
        workdir: &str,
        envs: &BTreeMap<String, String>,
        argv: &[&str],
        timeout: Duration,
    ) -> Result<TimedOutput> {
        let env_args: Vec<String> = envs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let mut args: Vec<&str> = vec!["exec", "-w", workdir];
        for env in &env_args {
            args.extend(["-e", env.as_str()]);
        }
        args.push(name);
        args.extend_from_slice(argv);

        debug!(runtime = self.binary, container = name, argv = ?argv, "runtime:exec");
        self.cmd().args(&args).output_with_timeout(timeout)
    }

    fn copy_from(&self, name: &str, path: &str) -> Result<Vec<u8>> {
        let source = format!("{}:{}", name, path);
        let output = self.cmd().args(&["cp", &source, "-"]).run()?;
        Ok(output.stdout)
    }

    fn copy_to(&self, name: &str, dir: &str, archive: &[u8]) -> Result<()> {
        let dest = format!("{}:{}", name, dir);
        self.cmd()
            .args(&["cp", "-", &dest])
            .stdin(archive)
            .run()?;
        Ok(())
    }

    fn port(&self, name: &str, port: u16) -> Result<Option<String>> {
        let spec = format!("{}/tcp", port);
        let output = self.cmd().args(&["port", name, &spec]).output()?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .find_map(parse_port_line))
    }
}
