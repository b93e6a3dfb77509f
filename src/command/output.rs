use anyhow::Result;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Padding, Style, object::Columns},
};

use agent_sandbox::sandbox::{FileInfo, HealthReport, SandboxInfo};

#[derive(Tabled)]
struct SandboxRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "BACKEND")]
    backend: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "TEMPLATE")]
    template: String,
    #[tabled(rename = "CREATED")]
    created: String,
    #[tabled(rename = "TIMEOUT")]
    timeout: String,
}

#[derive(Tabled)]
struct FileRow {
    #[tabled(rename = "TYPE")]
    kind: &'static str,
    #[tabled(rename = "MODE")]
    permissions: String,
    #[tabled(rename = "SIZE")]
    size: u64,
    #[tabled(rename = "MODIFIED")]
    modified: String,
    #[tabled(rename = "PATH")]
    path: String,
}

#[derive(Tabled)]
struct HealthRow {
    #[tabled(rename = "BACKEND")]
    backend: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "VERSION")]
    version: String,
    #[tabled(rename = "DETAILS")]
    details: String,
}

fn dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

fn render<T: Tabled>(rows: Vec<T>, columns: usize) -> String {
    let mut table = Table::new(rows);
    table
        .with(Style::blank())
        .modify(Columns::new(0..columns), Padding::new(0, 1, 0, 0));
    table.to_string()
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn sandbox_table(sandboxes: &[SandboxInfo]) -> String {
    let rows = sandboxes
        .iter()
        .map(|s| SandboxRow {
            id: s.sandbox_id.clone(),
            backend: s.backend.to_string(),
            status: s.status.to_string(),
            template: dash(s.template.as_deref()),
            created: s.created_at.clone(),
            timeout: s
                .timeout
                .map(|t| format!("{t}s"))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    render::<SandboxRow>(rows, 6)
}

/// Key/value lines for a single sandbox.
pub fn sandbox_details(info: &SandboxInfo) -> String {
    let mut lines = vec![
        format!("id:        {}", info.sandbox_id),
        format!("backend:   {}", info.backend),
        format!("status:    {}", info.status),
        format!("created:   {}", info.created_at),
        format!("template:  {}", dash(info.template.as_deref())),
    ];
    if let Some(timeout) = info.timeout {
        lines.push(format!("timeout:   {timeout}s"));
    }
    for (key, value) in &info.metadata {
        lines.push(format!("meta.{key}: {value}"));
    }
    for (port, url) in info.ports.iter().flatten() {
        lines.push(format!("port {port}: {url}"));
    }
    lines.join("\n")
}

pub fn file_table(entries: &[FileInfo]) -> String {
    let rows = entries
        .iter()
        .map(|f| FileRow {
            kind: if f.is_dir() { "dir" } else { "file" },
            permissions: f.permissions.clone(),
            size: f.size,
            modified: dash(f.modified_at.as_deref()),
            path: f.path.clone(),
        })
        .collect();
    render::<FileRow>(rows, 5)
}

pub fn health_table(reports: &[HealthReport]) -> String {
    let rows = reports
        .iter()
        .map(|r| HealthRow {
            backend: r.backend.clone(),
            status: if r.is_healthy() {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: dash(r.version.as_deref()),
            details: match &r.error {
                Some(error) => error.clone(),
                None => r
                    .details
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" "),
            },
        })
        .collect();
    render::<HealthRow>(rows, 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_sandbox::sandbox::{BackendKind, FileType, SandboxStatus};
    use std::collections::BTreeMap;

    fn sandbox() -> SandboxInfo {
        SandboxInfo {
            sandbox_id: "sbx_tmx_0123456789ab".into(),
            backend: BackendKind::Tmux,
            status: SandboxStatus::Running,
            created_at: "2026-03-01T10:00:00Z".into(),
            template: None,
            metadata: BTreeMap::from([("owner".to_string(), "ci".to_string())]),
            ports: None,
            timeout: Some(600),
        }
    }

    #[test]
    fn sandbox_table_has_headers_and_row() {
        let table = sandbox_table(&[sandbox()]);
        assert!(table.contains("ID"));
        assert!(table.contains("sbx_tmx_0123456789ab"));
        assert!(table.contains("600s"));
    }

    #[test]
    fn details_include_metadata() {
        let details = sandbox_details(&sandbox());
        assert!(details.contains("meta.owner: ci"));
        assert!(details.contains("template:  -"));
    }

    #[test]
    fn file_rows_show_type() {
        let entry = FileInfo {
            name: "src".into(),
            path: "/w/src".into(),
            file_type: FileType::Dir,
            size: 4096,
            permissions: "755".into(),
            modified_at: None,
        };
        let table = file_table(&[entry]);
        assert!(table.contains("dir"));
        assert!(table.contains("/w/src"));
    }

    #[test]
    fn unhealthy_rows_show_error() {
        let report = HealthReport::unhealthy(BackendKind::Container, "daemon unreachable");
        let table = health_table(&[report]);
        assert!(table.contains("unhealthy"));
        assert!(table.contains("daemon unreachable"));
    }
}
