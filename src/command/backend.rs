use std::collections::BTreeMap;

use anyhow::Result;

use agent_sandbox::sandbox::{HealthReport, HealthStatus};

use crate::cli::BackendCommands;

use super::Context;
use super::output::{health_table, print_json};

pub fn run(ctx: &Context, command: BackendCommands) -> Result<()> {
    match command {
        BackendCommands::List => {
            let names = ctx.registry.list_backends();
            let default = ctx.settings.backend.default_name();
            if ctx.json {
                return print_json(&serde_json::json!({
                    "backends": names,
                    "default": default,
                    "fallback": ctx.settings.backend.fallback_name(),
                }));
            }
            for name in names {
                let marker = if name == default { " (default)" } else { "" };
                println!("{name}{marker}");
            }
            Ok(())
        }
        BackendCommands::Health => {
            let reports = health(ctx);
            if ctx.json {
                print_json(&reports)
            } else {
                println!("{}", health_table(&reports));
                Ok(())
            }
        }
    }
}

/// One report per registered backend. A backend that cannot even be
/// constructed is reported unhealthy with the construction error.
fn health(ctx: &Context) -> Vec<HealthReport> {
    ctx.registry
        .list_backends()
        .into_iter()
        .map(
            |name| match ctx.registry.create_backend(&name, &ctx.settings, false) {
                Ok(backend) => backend.health_check(),
                Err(e) => HealthReport {
                    backend: name,
                    status: HealthStatus::Unhealthy,
                    version: None,
                    details: BTreeMap::new(),
                    error: Some(e.to_string()),
                },
            },
        )
        .collect()
}
