// Project boundary discovery
//
// A boundary is a (directory, logical name) pair read from package
// manifests under the root. Discovery runs once at open; the first
// boundary names the defaultProject.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectBoundary {
    /// Directory relative to the project root ("." for the root itself).
    pub directory: String,
    /// Logical project name.
    pub project: String,
}

/// Default discovery: the root manifest first, then first-level member
/// directories carrying their own manifest, sorted by directory name.
/// A root without a manifest still yields one boundary named after the
/// directory itself.
pub fn discover_project_boundaries(root: &Path) -> Result<Vec<ProjectBoundary>> {
    let mut boundaries = Vec::new();

    let root_name = manifest_name(&root.join("package.json"))
        .unwrap_or_else(|| directory_basename(root));
    boundaries.push(ProjectBoundary {
        directory: ".".to_string(),
        project: root_name,
    });

    let mut members: Vec<(String, String)> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();
            if dir_name.starts_with('.') || dir_name == "node_modules" {
                continue;
            }
            if let Some(name) = manifest_name(&path.join("package.json")) {
                members.push((dir_name, name));
            }
        }
    }
    members.sort();
    for (directory, project) in members {
        boundaries.push(ProjectBoundary { directory, project });
    }

    debug!("Discovered {} project boundaries", boundaries.len());
    Ok(boundaries)
}

fn manifest_name(manifest_path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(manifest_path).ok()?;
    let parsed: serde_json::Value = serde_json::from_str(&raw).ok()?;
    parsed
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub(crate) fn directory_basename(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.to_string_lossy().to_string())
}
