//! Parsers for the `find -printf` and `stat -c` formats used inside containers.

use crate::sandbox::{FileInfo, FileType, epoch_rfc3339};

/// `find` format: type, size, mode, mtime, path.
pub const FIND_FORMAT: &str = "%y|%s|%m|%T@|%p\\n";

/// `stat` format: type, size, mode, mtime, path.
pub const STAT_FORMAT: &str = "%F|%s|%a|%Y|%n";

fn file_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

/// Normalize octal mode digits (possibly with setuid/sticky bits) to `644` form.
fn permissions(mode: &str) -> Option<String> {
    let bits = u32::from_str_radix(mode.trim(), 8).ok()?;
    Some(format!("{:03o}", bits & 0o777))
}

fn build(file_type: FileType, size: &str, mode: &str, mtime: &str, path: &str) -> Option<FileInfo> {
    Some(FileInfo {
        name: file_name(path),
        path: path.to_string(),
        file_type,
        size: size.trim().parse().ok()?,
        permissions: permissions(mode)?,
        modified_at: mtime.trim().parse::<f64>().ok().and_then(epoch_rfc3339),
    })
}

/// One line of [`FIND_FORMAT`] output. Malformed lines yield `None`.
pub fn parse_find_line(line: &str) -> Option<FileInfo> {
    let mut parts = line.splitn(5, '|');
    let kind = parts.next()?;
    let size = parts.next()?;
    let mode = parts.next()?;
    let mtime = parts.next()?;
    let path = parts.next()?;
    if path.is_empty() {
        return None;
    }
    let file_type = if kind == "d" {
        FileType::Dir
    } else {
        FileType::File
    };
    build(file_type, size, mode, mtime, path)
}

/// Every well-formed line of `find` output, sorted by path.
pub fn parse_find_output(output: &str) -> Vec<FileInfo> {
    let mut entries: Vec<FileInfo> = output.lines().filter_map(parse_find_line).collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

/// Output of [`STAT_FORMAT`] for a single path.
pub fn parse_stat_output(output: &str) -> Option<FileInfo> {
    let line = output.lines().next()?;
    let mut parts = line.splitn(5, '|');
    let kind = parts.next()?;
    let size = parts.next()?;
    let mode = parts.next()?;
    let mtime = parts.next()?;
    let path = parts.next()?;
    let file_type = if kind == "directory" {
        FileType::Dir
    } else {
        FileType::File
    };
    build(file_type, size, mode, mtime, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_lines() {
        let output = "\
d|4096|755|1700000000.5000000000|/workspace/src
f|12|644|1700000001.0000000000|/workspace/src/app.py
f|3|4755|1700000002.0|/workspace/odd|name
garbage line
";
        let entries = parse_find_output(output);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].path, "/workspace/odd|name");
        assert_eq!(entries[0].name, "odd|name");
        assert_eq!(entries[0].permissions, "755");

        assert_eq!(entries[1].name, "src");
        assert!(entries[1].is_dir());
        assert_eq!(entries[1].modified_at.as_deref(), Some("2023-11-14T22:13:20Z"));

        assert_eq!(entries[2].name, "app.py");
        assert_eq!(entries[2].size, 12);
        assert_eq!(entries[2].file_type, FileType::File);
    }

    #[test]
    fn stat_output() {
        let info = parse_stat_output("regular file|5|600|1700000000|/workspace/secret\n").unwrap();
        assert_eq!(info.name, "secret");
        assert_eq!(info.permissions, "600");
        assert_eq!(info.file_type, FileType::File);

        let dir = parse_stat_output("directory|4096|1777|1700000000|/tmp").unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.permissions, "777");

        assert!(parse_stat_output("").is_none());
        assert!(parse_stat_output("regular file|x|644|0|/a").is_none());
    }
}
