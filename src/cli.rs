use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::command;

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(name = "sbx")]
#[command(about = "Create and drive disposable sandboxes backed by containers or tmux sessions")]
struct Cli {
    /// Backend to use (container, tmux, or an alias such as docker). Defaults to config.
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Extra config file, merged over the standard locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a sandbox and print its id
    Create {
        /// Image/template name (container backend)
        #[arg(long)]
        template: Option<String>,

        /// Sandbox lifetime in seconds before `reap` kills it
        #[arg(long)]
        timeout: Option<u64>,

        /// Environment variable for every command (KEY=VALUE, repeatable)
        #[arg(short = 'e', long = "env", value_parser = parse_key_val)]
        envs: Vec<(String, String)>,

        /// Metadata attached to the sandbox (KEY=VALUE, repeatable)
        #[arg(short = 'm', long = "meta", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,

        /// Container port to publish on the host (repeatable)
        #[arg(short = 'p', long = "port")]
        ports: Vec<u16>,
    },

    /// Re-attach to a sandbox, restarting it if needed
    Connect { id: String },

    /// Show details of one sandbox
    Info { id: String },

    /// List sandboxes
    #[command(visible_alias = "ls")]
    List {
        /// Show at most this many sandboxes
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Destroy a sandbox and its workspace bookkeeping
    Kill { id: String },

    /// Freeze a sandbox (container backend only)
    Pause { id: String },

    /// Unfreeze a paused sandbox
    Resume { id: String },

    /// Kill every sandbox whose lifetime has elapsed
    Reap,

    /// Run a command inside a sandbox and exit with its exit code
    Exec {
        id: String,

        /// Command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Working directory (defaults to the workspace)
        #[arg(long)]
        cwd: Option<String>,

        /// Extra environment variable (KEY=VALUE, repeatable)
        #[arg(short = 'e', long = "env", value_parser = parse_key_val)]
        envs: Vec<(String, String)>,

        /// Seconds to wait before giving up (exit code 124)
        #[arg(long)]
        timeout: Option<u64>,

        /// Start the command and return immediately
        #[arg(long)]
        background: bool,

        /// Pass the command straight to exec instead of through a shell
        #[arg(long)]
        no_shell: bool,
    },

    /// Inspect and modify files inside a sandbox
    Files {
        #[command(subcommand)]
        command: FilesCommands,
    },

    /// Print the host URL for a port inside the sandbox
    Host { id: String, port: u16 },

    /// Inspect available backends
    Backend {
        #[command(subcommand)]
        command: BackendCommands,
    },
}

#[derive(Subcommand)]
pub enum FilesCommands {
    /// List entries below a directory
    Ls {
        id: String,
        #[arg(default_value = ".")]
        path: String,
        /// How many levels to descend (1 = direct children)
        #[arg(long, default_value_t = 1)]
        depth: usize,
    },
    /// Print a file to stdout
    Cat { id: String, path: String },
    /// Write a file from --content or stdin
    Write {
        id: String,
        path: String,
        #[arg(long)]
        content: Option<String>,
    },
    /// Remove a file or directory tree
    Rm { id: String, path: String },
    /// Create a directory and its parents
    Mkdir { id: String, path: String },
    /// Move or rename a path
    Mv {
        id: String,
        old_path: String,
        new_path: String,
    },
    /// Show metadata for a path
    Stat { id: String, path: String },
    /// Report whether a path exists (exit code 1 if not)
    Exists { id: String, path: String },
}

#[derive(Subcommand)]
pub enum BackendCommands {
    /// List registered backend names
    List,
    /// Construct each backend and report its health
    Health,
}

/// Parse a single `KEY=VALUE` pair.
fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let ctx = command::Context::new(cli.backend.as_deref(), cli.config.as_deref(), cli.json)?;

    match cli.command {
        Commands::Create {
            template,
            timeout,
            envs,
            metadata,
            ports,
        } => command::sandbox::create(
            &ctx,
            command::sandbox::CreateArgs {
                template,
                timeout,
                envs: envs.into_iter().collect(),
                metadata: metadata.into_iter().collect(),
                ports,
            },
        ),
        Commands::Connect { id } => command::sandbox::connect(&ctx, &id),
        Commands::Info { id } => command::sandbox::info(&ctx, &id),
        Commands::List { limit } => command::sandbox::list(&ctx, limit),
        Commands::Kill { id } => command::sandbox::kill(&ctx, &id),
        Commands::Pause { id } => command::sandbox::pause(&ctx, &id),
        Commands::Resume { id } => command::sandbox::resume(&ctx, &id),
        Commands::Reap => command::sandbox::reap(&ctx),
        Commands::Exec {
            id,
            command,
            cwd,
            envs,
            timeout,
            background,
            no_shell,
        } => {
            let code = command::exec::run(
                &ctx,
                &id,
                &command.join(" "),
                command::exec::ExecArgs {
                    cwd,
                    envs: envs.into_iter().collect(),
                    timeout,
                    background,
                    shell: !no_shell,
                },
            )?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Files { command } => command::files::run(&ctx, command),
        Commands::Host { id, port } => command::sandbox::host(&ctx, &id, port),
        Commands::Backend { command } => command::backend::run(&ctx, command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn key_val_pairs() {
        assert_eq!(
            parse_key_val("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert_eq!(parse_key_val("EMPTY=").unwrap().1, "");
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn exec_collects_trailing_command() {
        let cli = Cli::try_parse_from([
            "sbx", "exec", "sbx_tmx_0123456789ab", "--timeout", "5", "ls", "-la", "/tmp",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec {
                command, timeout, ..
            } => {
                assert_eq!(command, vec!["ls", "-la", "/tmp"]);
                assert_eq!(timeout, Some(5));
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sbx", "list", "--backend", "docker", "--json"]).unwrap();
        assert_eq!(cli.backend.as_deref(), Some("docker"));
        assert!(cli.json);
    }
}
