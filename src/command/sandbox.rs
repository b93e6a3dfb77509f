use std::collections::BTreeMap;

use anyhow::Result;

use agent_sandbox::sandbox::CreateOptions;

use super::Context;
use super::output::{print_json, sandbox_details, sandbox_table};

pub struct CreateArgs {
    pub template: Option<String>,
    pub timeout: Option<u64>,
    pub envs: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
    pub ports: Vec<u16>,
}

pub fn create(ctx: &Context, args: CreateArgs) -> Result<()> {
    let backend = ctx.backend()?;
    let options = CreateOptions {
        template: args.template,
        timeout: args.timeout,
        envs: args.envs,
        metadata: args.metadata,
        ports: args.ports,
    };
    let id = backend.create_sandbox(&options)?;

    if ctx.json {
        let info = backend.get_sandbox_info(&id)?;
        print_json(&info)?;
    } else {
        println!("{id}");
    }
    Ok(())
}

pub fn connect(ctx: &Context, id: &str) -> Result<()> {
    let info = ctx.backend()?.connect_sandbox(id)?;
    if ctx.json {
        print_json(&info)
    } else {
        println!("{}", sandbox_details(&info));
        Ok(())
    }
}

pub fn info(ctx: &Context, id: &str) -> Result<()> {
    let info = ctx.backend()?.get_sandbox_info(id)?;
    if ctx.json {
        print_json(&info)
    } else {
        println!("{}", sandbox_details(&info));
        Ok(())
    }
}

pub fn list(ctx: &Context, limit: usize) -> Result<()> {
    let sandboxes = ctx.backend()?.list_sandboxes(limit)?;
    if ctx.json {
        return print_json(&sandboxes);
    }
    if sandboxes.is_empty() {
        println!("No sandboxes found");
        return Ok(());
    }
    println!("{}", sandbox_table(&sandboxes));
    Ok(())
}

fn report_flag(ctx: &Context, action: &str, id: &str, done: bool) -> Result<()> {
    if ctx.json {
        return print_json(&serde_json::json!({ "sandbox_id": id, action: done }));
    }
    if done {
        println!("{action}: {id}");
    } else {
        println!("{action}: {id} (no change)");
    }
    Ok(())
}

pub fn kill(ctx: &Context, id: &str) -> Result<()> {
    let killed = ctx.backend()?.kill_sandbox(id)?;
    report_flag(ctx, "killed", id, killed)
}

pub fn pause(ctx: &Context, id: &str) -> Result<()> {
    let backend = ctx.backend()?;
    let paused = backend.pause_sandbox(id)?;
    if !paused && !backend.capabilities().pause && !ctx.json {
        eprintln!("The {} backend cannot pause sandboxes", backend.name());
    }
    report_flag(ctx, "paused", id, paused)
}

pub fn resume(ctx: &Context, id: &str) -> Result<()> {
    let resumed = ctx.backend()?.resume_sandbox(id)?;
    report_flag(ctx, "resumed", id, resumed)
}

pub fn reap(ctx: &Context) -> Result<()> {
    let reaped = ctx.backend()?.reap_expired()?;
    if ctx.json {
        return print_json(&reaped);
    }
    if reaped.is_empty() {
        println!("No expired sandboxes");
    }
    for id in reaped {
        println!("reaped: {id}");
    }
    Ok(())
}

pub fn host(ctx: &Context, id: &str, port: u16) -> Result<()> {
    let url = ctx.backend()?.get_host(id, port)?;
    if ctx.json {
        print_json(&serde_json::json!({ "sandbox_id": id, "port": port, "url": url }))
    } else {
        println!("{url}");
        Ok(())
    }
}
