use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use agent_sandbox::sandbox::{CommandOptions, CommandResult};

use super::Context;
use super::output::print_json;

/// Process exit code used when the command hit its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

pub struct ExecArgs {
    pub cwd: Option<String>,
    pub envs: BTreeMap<String, String>,
    pub timeout: Option<u64>,
    pub background: bool,
    pub shell: bool,
}

/// Run `command` and relay its output. Returns the exit code for the process.
pub fn run(ctx: &Context, id: &str, command: &str, args: ExecArgs) -> Result<i32> {
    let backend = ctx.backend()?;
    let options = CommandOptions {
        cwd: args.cwd,
        envs: args.envs,
        timeout: args.timeout.map(Duration::from_secs),
        shell: args.shell,
    };

    if args.background {
        let result = backend.run_command_background(id, command, &options)?;
        if ctx.json {
            print_json(&result)?;
        } else {
            match &result.pid {
                Some(pid) => println!("started: pid {pid}"),
                None => println!("started"),
            }
        }
        return Ok(0);
    }

    let result = backend.run_command(id, command, &options)?;
    info!(sandbox_id = id, exit_code = result.exit_code, "cli:exec finished");
    if ctx.json {
        print_json(&result)?;
    } else {
        relay(&result)?;
    }
    Ok(exit_code(&result))
}

fn relay(result: &CommandResult) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.stdout.as_bytes())?;
    stdout.flush()?;

    let mut stderr = std::io::stderr().lock();
    stderr.write_all(result.stderr.as_bytes())?;
    if result.timed_out() {
        writeln!(stderr, "sbx: command timed out")?;
    }
    Ok(())
}

fn exit_code(result: &CommandResult) -> i32 {
    if result.timed_out() {
        TIMEOUT_EXIT_CODE
    } else {
        result.exit_code
    }
}
