use std::io::{Read, Write};

use anyhow::{Context as _, Result};

use crate::cli::FilesCommands;

use super::Context;
use super::output::{file_table, print_json};

pub fn run(ctx: &Context, command: FilesCommands) -> Result<()> {
    let backend = ctx.backend()?;

    match command {
        FilesCommands::Ls { id, path, depth } => {
            let entries = backend.list_files(&id, &path, depth)?;
            if ctx.json {
                print_json(&entries)
            } else {
                if !entries.is_empty() {
                    println!("{}", file_table(&entries));
                }
                Ok(())
            }
        }
        FilesCommands::Cat { id, path } => {
            let data = backend.read_file_bytes(&id, &path)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
            Ok(())
        }
        FilesCommands::Write { id, path, content } => {
            let data = match content {
                Some(text) => text.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin()
                        .read_to_end(&mut buf)
                        .context("Failed to read file contents from stdin")?;
                    buf
                }
            };
            let info = backend.write_file_bytes(&id, &path, &data)?;
            if ctx.json {
                print_json(&info)
            } else {
                println!("wrote {} bytes to {}", info.size, info.path);
                Ok(())
            }
        }
        FilesCommands::Rm { id, path } => {
            backend.remove_file(&id, &path)?;
            Ok(())
        }
        FilesCommands::Mkdir { id, path } => {
            let created = backend.make_directory(&id, &path)?;
            if ctx.json {
                print_json(&serde_json::json!({ "path": path, "exists": created }))
            } else {
                Ok(())
            }
        }
        FilesCommands::Mv {
            id,
            old_path,
            new_path,
        } => {
            let info = backend.rename_file(&id, &old_path, &new_path)?;
            if ctx.json {
                print_json(&info)
            } else {
                println!("{}", info.path);
                Ok(())
            }
        }
        FilesCommands::Stat { id, path } => {
            let info = backend.get_file_info(&id, &path)?;
            if ctx.json {
                print_json(&info)
            } else {
                println!("{}", file_table(std::slice::from_ref(&info)));
                Ok(())
            }
        }
        FilesCommands::Exists { id, path } => {
            let exists = backend.file_exists(&id, &path)?;
            if ctx.json {
                print_json(&serde_json::json!({ "path": path, "exists": exists }))?;
            } else {
                println!("{exists}");
            }
            if !exists {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
