//! End-to-end checks against a real docker daemon.
//!
//! Tests return early unless docker is installed, the daemon answers, and the
//! `agent-sandbox-base:latest` image has been built.

use std::collections::BTreeMap;
use std::process::Command;
use std::time::Duration;

use agent_sandbox::config::Settings;
use agent_sandbox::sandbox::{
    CommandOptions, ContainerBackend, CreateOptions, SandboxBackend, SandboxError, SandboxStatus,
};
use tempfile::TempDir;

const BASE_IMAGE: &str = "agent-sandbox-base:latest";

fn image_available() -> bool {
    if which::which("docker").is_err() {
        return false;
    }
    Command::new("docker")
        .args(["image", "inspect", BASE_IMAGE])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn backend(scratch: &TempDir) -> Option<ContainerBackend> {
    if !image_available() {
        eprintln!("docker or {BASE_IMAGE} unavailable; skipping");
        return None;
    }
    let yaml = format!(
        "container:\n  runtime: docker\n  workspace_dir: {}\n  cleanup_workspace: true\n",
        scratch.path().display()
    );
    let settings = Settings::from_yaml(&yaml).unwrap();
    ContainerBackend::new(&settings).ok()
}

#[test]
fn command_streams_are_separate() {
    let scratch = TempDir::new().unwrap();
    let Some(backend) = backend(&scratch) else {
        return;
    };
    let id = backend
        .create_sandbox(&CreateOptions {
            metadata: BTreeMap::from([("suite".to_string(), "it".to_string())]),
            ..Default::default()
        })
        .unwrap();
    assert!(id.starts_with("sbx_ctr_"));

    let info = backend.get_sandbox_info(&id).unwrap();
    assert_eq!(info.status, SandboxStatus::Running);
    assert_eq!(info.template.as_deref(), Some("base"));
    assert_eq!(info.metadata["suite"], "it");

    let hello = backend
        .run_command(&id, "echo hello world", &CommandOptions::default())
        .unwrap();
    assert_eq!(hello.stdout, "hello world");
    assert_eq!(hello.exit_code, 0);

    let result = backend
        .run_command(
            &id,
            "echo out; echo err >&2; exit 2",
            &CommandOptions::default(),
        )
        .unwrap();
    assert_eq!(result.stdout, "out");
    assert_eq!(result.stderr, "err");
    assert_eq!(result.exit_code, 2);

    let timed_out = backend
        .run_command(
            &id,
            "sleep 10",
            &CommandOptions::default().with_timeout(Duration::from_secs(1)),
        )
        .unwrap();
    assert!(timed_out.timed_out());

    let bg = backend
        .run_command_background(&id, "sleep 30", &CommandOptions::default())
        .unwrap();
    assert!(bg.pid.is_some());

    assert!(backend.kill_sandbox(&id).unwrap());
    assert!(!backend.is_sandbox_running(&id).unwrap());
    assert!(!backend.kill_sandbox(&id).unwrap());
    assert!(matches!(
        backend.get_sandbox_info(&id),
        Err(SandboxError::NotFound(_))
    ));
}

#[test]
fn files_round_trip_through_the_container() {
    let scratch = TempDir::new().unwrap();
    let Some(backend) = backend(&scratch) else {
        return;
    };
    let id = backend.create_sandbox(&CreateOptions::default()).unwrap();

    let binary: Vec<u8> = (0..=255u8).collect();
    let written = backend
        .write_file_bytes(&id, "/workspace/data/blob.bin", &binary)
        .unwrap();
    assert_eq!(written.name, "blob.bin");
    assert_eq!(written.path, "/workspace/data/blob.bin");
    assert_eq!(written.size, 256);
    assert_eq!(
        backend.read_file_bytes(&id, "data/blob.bin").unwrap(),
        binary
    );

    backend
        .write_file(&id, "notes.txt", "first line\nsecond line\n")
        .unwrap();
    assert_eq!(
        backend.read_file(&id, "/workspace/notes.txt").unwrap(),
        "first line\nsecond line\n"
    );

    let info = backend.get_file_info(&id, "/workspace/data/blob.bin").unwrap();
    assert_eq!(info.size, 256);
    assert!(!info.is_dir());

    let entries = backend.list_files(&id, "/workspace", 2).unwrap();
    assert!(entries.iter().any(|e| e.path == "/workspace/data/blob.bin"));

    assert!(backend.make_directory(&id, "/workspace/out").unwrap());
    let moved = backend
        .rename_file(&id, "/workspace/data/blob.bin", "/workspace/out/blob.bin")
        .unwrap();
    assert_eq!(moved.name, "blob.bin");
    assert!(!backend.file_exists(&id, "/workspace/data/blob.bin").unwrap());

    backend.remove_file(&id, "/workspace/out").unwrap();
    assert!(!backend.file_exists(&id, "/workspace/out").unwrap());

    assert!(backend.kill_sandbox(&id).unwrap());
}

#[test]
fn pause_and_resume() {
    let scratch = TempDir::new().unwrap();
    let Some(backend) = backend(&scratch) else {
        return;
    };
    let id = backend.create_sandbox(&CreateOptions::default()).unwrap();

    assert!(backend.pause_sandbox(&id).unwrap());
    assert_eq!(
        backend.get_sandbox_info(&id).unwrap().status,
        SandboxStatus::Paused
    );
    assert!(backend.resume_sandbox(&id).unwrap());
    assert!(backend.is_sandbox_running(&id).unwrap());

    assert!(backend.kill_sandbox(&id).unwrap());
}

#[test]
fn list_is_bounded_by_the_limit() {
    let scratch = TempDir::new().unwrap();
    let Some(backend) = backend(&scratch) else {
        return;
    };
    let ids: Vec<String> = (0..3)
        .map(|_| backend.create_sandbox(&CreateOptions::default()).unwrap())
        .collect();

    let listed = backend.list_sandboxes(100).unwrap();
    for id in &ids {
        assert!(listed.iter().any(|s| &s.sandbox_id == id));
    }
    assert!(listed.iter().all(|s| s.sandbox_id.starts_with("sbx_ctr_")));
    assert_eq!(backend.list_sandboxes(2).unwrap().len(), 2);

    for id in &ids {
        assert!(backend.kill_sandbox(id).unwrap());
    }
}
