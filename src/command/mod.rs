pub mod backend;
pub mod exec;
pub mod files;
pub mod output;
pub mod sandbox;

use std::path::Path;
use std::sync::{Arc, OnceLock};

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use agent_sandbox::config::Settings;
use agent_sandbox::sandbox::{BackendRegistry, SandboxBackend};

/// Everything a subcommand needs: merged settings, the registry, and a lazily
/// constructed backend.
pub struct Context {
    pub settings: Settings,
    pub registry: BackendRegistry,
    pub json: bool,
    requested: Option<String>,
    backend: OnceLock<Arc<dyn SandboxBackend>>,
}

impl Context {
    pub fn new(requested: Option<&str>, config: Option<&Path>, json: bool) -> Result<Self> {
        let settings = Settings::load(config).context("Failed to load configuration")?;
        Ok(Self {
            settings,
            registry: BackendRegistry::new(),
            json,
            requested: requested.map(str::to_string),
            backend: OnceLock::new(),
        })
    }

    /// The selected backend, constructed on first use.
    ///
    /// An explicit `--backend` must construct. Otherwise the configured default
    /// is tried first and the configured fallback after it.
    pub fn backend(&self) -> Result<Arc<dyn SandboxBackend>> {
        if let Some(backend) = self.backend.get() {
            return Ok(Arc::clone(backend));
        }
        let backend = self.select_backend()?;
        let _ = self.backend.set(Arc::clone(&backend));
        Ok(backend)
    }

    fn select_backend(&self) -> Result<Arc<dyn SandboxBackend>> {
        if let Some(name) = &self.requested {
            return self
                .registry
                .create_backend(name, &self.settings, true)
                .with_context(|| format!("Backend '{name}' is unavailable"));
        }

        let primary = self.settings.backend.default_name();
        let err = match self.registry.create_backend(primary, &self.settings, true) {
            Ok(backend) => return Ok(backend),
            Err(e) => e,
        };

        let Some(fallback) = self.settings.backend.fallback_name() else {
            return Err(err).with_context(|| format!("Backend '{primary}' is unavailable"));
        };
        warn!(primary, fallback, error = %err, "cli:default backend unavailable, using fallback");
        eprintln!("Backend '{primary}' is unavailable ({err}); falling back to '{fallback}'");

        let backend = self
            .registry
            .create_backend(fallback, &self.settings, true)
            .with_context(|| format!("Fallback backend '{fallback}' is unavailable too"))?;
        info!(backend = backend.name(), "cli:using fallback backend");
        Ok(backend)
    }
}
