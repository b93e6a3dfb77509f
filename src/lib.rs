//! Disposable, isolated execution environments ("sandboxes") for agents.
//!
//! One [`sandbox::SandboxBackend`] contract, two implementations: OCI
//! containers driven through the docker/podman CLI, and tmux sessions on the
//! host. [`sandbox::BackendRegistry`] picks one by name.

pub mod cmd;
pub mod config;
pub mod logger;
pub mod sandbox;
pub mod shell;
