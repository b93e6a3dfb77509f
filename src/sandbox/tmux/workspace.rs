//! Host-side view of a tmux sandbox's workspace.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use crate::sandbox::{FileInfo, FileType, Result, SandboxError, system_time_rfc3339};

/// Path callers use for the workspace root, mirroring the container mount.
pub const LEGACY_ROOT: &str = "/workspace";

/// Strip the `/workspace` prefix, but only at a path-component boundary.
fn strip_legacy_root(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(LEGACY_ROOT)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

/// Map a caller path onto the host filesystem under `root`.
///
/// `/workspace/...`, other absolute paths, and relative paths all land inside
/// the workspace. `..` that would climb above it is rejected.
pub fn resolve(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = strip_legacy_root(path).unwrap_or(path);

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(SandboxError::FileOperation(format!(
                        "path escapes the workspace: {}",
                        path
                    )));
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(parts);
    Ok(resolved)
}

/// Map a command's working directory onto the host.
///
/// Unlike file paths, absolute directories outside `/workspace` are taken
/// as-is: the session runs on the host and may `cd` anywhere.
pub fn resolve_cwd(root: &Path, cwd: &str) -> Result<PathBuf> {
    if cwd.starts_with('/') && strip_legacy_root(cwd).is_none() {
        return Ok(PathBuf::from(cwd));
    }
    resolve(root, cwd)
}

/// Describe one host path.
pub fn file_info(path: &Path) -> io::Result<FileInfo> {
    let metadata = fs::metadata(path).or_else(|_| fs::symlink_metadata(path))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(FileInfo {
        name,
        path: path.to_string_lossy().into_owned(),
        file_type: if metadata.is_dir() {
            FileType::Dir
        } else {
            FileType::File
        },
        size: metadata.len(),
        permissions: format!("{:03o}", metadata.permissions().mode() & 0o777),
        modified_at: metadata.modified().ok().map(system_time_rfc3339),
    })
}

/// Entries below `dir` down to `depth` levels, sorted by path.
///
/// Symlinked directories are listed but not descended into.
pub fn list_dir(dir: &Path, depth: usize) -> io::Result<Vec<FileInfo>> {
    let mut entries = Vec::new();
    if depth > 0 {
        walk(dir, depth, &mut entries)?;
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn walk(dir: &Path, remaining: usize, out: &mut Vec<FileInfo>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        out.push(file_info(&path)?);
        if remaining > 1 && entry.file_type()?.is_dir() {
            walk(&path, remaining - 1, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_prefix_maps_to_root() {
        let root = Path::new("/host/ws");
        assert_eq!(resolve(root, "/workspace").unwrap(), root);
        assert_eq!(resolve(root, "/workspace/").unwrap(), root);
        assert_eq!(
            resolve(root, "/workspace/src/main.rs").unwrap(),
            root.join("src/main.rs")
        );
    }

    #[test]
    fn prefix_only_at_component_boundary() {
        let root = Path::new("/host/ws");
        assert_eq!(
            resolve(root, "/workspaces/x").unwrap(),
            root.join("workspaces/x")
        );
    }

    #[test]
    fn absolute_and_relative_paths_are_workspace_relative() {
        let root = Path::new("/host/ws");
        assert_eq!(resolve(root, "/etc/passwd").unwrap(), root.join("etc/passwd"));
        assert_eq!(resolve(root, "a/./b").unwrap(), root.join("a/b"));
        assert_eq!(resolve(root, "a/../b").unwrap(), root.join("b"));
    }

    #[test]
    fn escaping_the_workspace_is_rejected() {
        let root = Path::new("/host/ws");
        for bad in ["..", "../x", "/workspace/../..", "a/../../b"] {
            let err = resolve(root, bad).unwrap_err();
            assert!(matches!(err, SandboxError::FileOperation(_)), "{bad}");
        }
    }

    #[test]
    fn cwd_outside_workspace_is_verbatim() {
        let root = Path::new("/host/ws");
        assert_eq!(resolve_cwd(root, "/tmp").unwrap(), PathBuf::from("/tmp"));
        assert_eq!(resolve_cwd(root, "/workspace/app").unwrap(), root.join("app"));
        assert_eq!(resolve_cwd(root, "app").unwrap(), root.join("app"));
    }

    #[test]
    fn list_dir_respects_depth() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("top.txt"), "hi").unwrap();
        fs::write(dir.path().join("a/b/deep.txt"), "deep").unwrap();

        let shallow = list_dir(dir.path(), 1).unwrap();
        let names: Vec<_> = shallow.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "top.txt"]);
        assert!(shallow[0].is_dir());
        assert_eq!(shallow[1].size, 2);

        let deep = list_dir(dir.path(), 3).unwrap();
        assert_eq!(deep.len(), 4);
        assert!(deep.iter().any(|f| f.name == "deep.txt"));

        assert!(list_dir(dir.path(), 0).unwrap().is_empty());
    }

    #[test]
    fn file_info_reports_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let info = file_info(&path).unwrap();
        assert_eq!(info.permissions, "755");
        assert_eq!(info.file_type, FileType::File);
        assert!(info.modified_at.is_some());
    }
}
