// tsconfig path-mapping loader
//
// Resolves compilerOptions.baseUrl/paths so the relation extractor can
// canonicalize aliased import specifiers. Reloaded whenever the indexer
// sees tsconfig.json change.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathAlias {
    /// Alias pattern, e.g. "@app/*". At most one wildcard.
    pub pattern: String,
    /// Substitution targets relative to base_url, e.g. ["src/*"].
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathMappings {
    pub base_url: Option<String>,
    pub aliases: Vec<PathAlias>,
}

impl PathMappings {
    /// Resolve an import specifier through the alias table. Returns the
    /// first matching substitution, base_url-prefixed, or None when no
    /// alias applies.
    pub fn resolve(&self, specifier: &str) -> Option<String> {
        for alias in &self.aliases {
            if let Some(captured) = match_alias(&alias.pattern, specifier) {
                let target = alias.targets.first()?;
                let substituted = target.replacen('*', captured, 1);
                return Some(match &self.base_url {
                    Some(base) if !base.is_empty() && base != "." => {
                        format!("{}/{}", base.trim_end_matches('/'), substituted)
                    }
                    _ => substituted,
                });
            }
        }
        None
    }
}

fn match_alias<'a>(pattern: &str, specifier: &'a str) -> Option<&'a str> {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            let rest = specifier.strip_prefix(prefix)?;
            rest.strip_suffix(suffix)
        }
        None => (pattern == specifier).then_some(""),
    }
}

/// Load mappings from `<root>/tsconfig.json`. A missing or unreadable
/// tsconfig yields empty mappings; a present-but-invalid one is logged
/// and also yields empty mappings.
pub fn load_path_mappings(root: &Path) -> Result<PathMappings> {
    let tsconfig_path = root.join("tsconfig.json");
    let raw = match std::fs::read_to_string(&tsconfig_path) {
        Ok(raw) => raw,
        Err(_) => return Ok(PathMappings::default()),
    };

    let parsed: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse {}: {}", tsconfig_path.display(), e);
            return Ok(PathMappings::default());
        }
    };

    let compiler_options = parsed.get("compilerOptions");
    let base_url = compiler_options
        .and_then(|o| o.get("baseUrl"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut aliases = Vec::new();
    if let Some(paths) = compiler_options
        .and_then(|o| o.get("paths"))
        .and_then(|v| v.as_object())
    {
        for (pattern, targets) in paths {
            let targets: Vec<String> = targets
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|t| t.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            if !targets.is_empty() {
                aliases.push(PathAlias {
                    pattern: pattern.clone(),
                    targets,
                });
            }
        }
    }
    aliases.sort_by(|a, b| a.pattern.cmp(&b.pattern));

    debug!(
        "Loaded {} path aliases from {}",
        aliases.len(),
        tsconfig_path.display()
    );
    Ok(PathMappings { base_url, aliases })
}
