//! Name-to-backend factory with a per-name instance cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::config::Settings;

use super::{ContainerBackend, Result, SandboxBackend, SandboxError, TmuxBackend};

/// Builds a backend from settings, validating its prerequisites.
pub type BackendConstructor = fn(&Settings) -> Result<Arc<dyn SandboxBackend>>;

fn construct_container(settings: &Settings) -> Result<Arc<dyn SandboxBackend>> {
    Ok(Arc::new(ContainerBackend::new(settings)?))
}

fn construct_tmux(settings: &Settings) -> Result<Arc<dyn SandboxBackend>> {
    Ok(Arc::new(TmuxBackend::new(settings)?))
}

/// Lowercase `name` and resolve the built-in aliases.
pub fn canonical_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "docker" | "podman" | "orbstack" => "container".to_string(),
        "terminal" => "tmux".to_string(),
        _ => lower,
    }
}

#[derive(Default)]
struct Constructors {
    by_name: BTreeMap<String, BackendConstructor>,
    defaults_loaded: bool,
}

/// Maps backend names to constructors and caches at most one live instance
/// per name.
///
/// Clearing the cache drops instances only; sandboxes they created keep
/// running and can be reached again through a fresh instance.
#[derive(Default)]
pub struct BackendRegistry {
    constructors: Mutex<Constructors>,
    instances: Mutex<HashMap<String, Arc<dyn SandboxBackend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a constructor under `name`.
    pub fn register(&self, name: &str, constructor: BackendConstructor) {
        let name = canonical_name(name);
        debug!(backend = %name, "registry:register");
        let mut constructors = self.lock_constructors();
        constructors.by_name.insert(name, constructor);
    }

    fn lock_constructors(&self) -> std::sync::MutexGuard<'_, Constructors> {
        let mut guard = self
            .constructors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !guard.defaults_loaded {
            guard.defaults_loaded = true;
            guard
                .by_name
                .entry("container".to_string())
                .or_insert(construct_container);
            guard
                .by_name
                .entry("tmux".to_string())
                .or_insert(construct_tmux);
        }
        guard
    }

    /// Names of every registered backend, sorted.
    pub fn list_backends(&self) -> Vec<String> {
        self.lock_constructors().by_name.keys().cloned().collect()
    }

    /// The backend registered under `name` (or an alias of it).
    ///
    /// With `cache`, an existing instance is reused and a new one is kept for
    /// later calls.
    pub fn create_backend(
        &self,
        name: &str,
        settings: &Settings,
        cache: bool,
    ) -> Result<Arc<dyn SandboxBackend>> {
        let name = canonical_name(name);
        let constructor = {
            let constructors = self.lock_constructors();
            match constructors.by_name.get(&name) {
                Some(constructor) => *constructor,
                None => {
                    return Err(SandboxError::InvalidBackend {
                        name,
                        available: constructors
                            .by_name
                            .keys()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", "),
                    });
                }
            }
        };

        if !cache {
            debug!(backend = %name, "registry:constructing uncached");
            return constructor(settings);
        }

        // Held across construction so two callers never build the same backend twice.
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = instances.get(&name) {
            return Ok(Arc::clone(existing));
        }
        let backend = constructor(settings)?;
        instances.insert(name.clone(), Arc::clone(&backend));
        info!(backend = %name, "registry:backend initialized");
        Ok(backend)
    }

    /// Forget every cached instance.
    pub fn clear_cache(&self) {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(count = instances.len(), "registry:clear cache");
        instances.clear();
    }
}
