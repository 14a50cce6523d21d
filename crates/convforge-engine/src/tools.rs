//! External tool detection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use convforge_common::{Error, Result};
use tracing::debug;

use crate::context::ContextStore;

/// Tools looked up on every run, with the flag that prints their version.
pub const KNOWN_TOOLS: &[(&str, &str)] = &[
    ("ffmpeg", "-version"),
    ("ffprobe", "-version"),
    ("mkvmerge", "--version"),
    ("sox", "--version"),
];

/// Prefix of the dynamic parameters exposing tool paths (`tool.ffmpeg`).
pub const TOOL_PARAM_PREFIX: &str = "tool.";

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Run `program version_arg` and report what it prints.
pub fn check_tool_with_arg(name: &str, program: &Path, version_arg: &str) -> ToolInfo {
    match Command::new(program).arg(version_arg).output() {
        Ok(output) if output.status.success() => ToolInfo {
            name: name.to_string(),
            available: true,
            version: String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string()),
            path: Some(program.to_path_buf()),
        },
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Resolved tool paths for one run.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, PathBuf>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the known tools plus any configured extras.
    ///
    /// A configured path is used when it exists; otherwise the tool is
    /// searched on `PATH`. Tools that cannot be found are left out.
    pub fn discover(configured: &BTreeMap<String, PathBuf>) -> Self {
        let mut registry = Self::new();

        let names = KNOWN_TOOLS
            .iter()
            .map(|(name, _)| name.to_string())
            .chain(configured.keys().cloned());

        for name in names {
            if registry.tools.contains_key(&name) {
                continue;
            }
            let path = configured
                .get(&name)
                .filter(|p| p.exists())
                .cloned()
                .or_else(|| which::which(&name).ok());

            match path {
                Some(path) => {
                    debug!(tool = %name, path = %path.display(), "tool found");
                    registry = registry.with_tool(name, path);
                }
                None => debug!(tool = %name, "tool not found"),
            }
        }
        registry
    }

    /// Builder: register a tool path directly.
    #[must_use]
    pub fn with_tool(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(name.into(), path.into());
        self
    }

    /// Path of a tool, if found.
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.tools.get(name).map(PathBuf::as_path)
    }

    /// Path of a tool that must be present.
    pub fn require(&self, name: &str) -> Result<&Path> {
        self.get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    /// Iterate `(name, path)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.tools.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    /// Expose every tool as dynamic parameter `tool.<name>`.
    pub fn export(&self, store: &mut ContextStore) {
        for (name, path) in self.iter() {
            store.set_dynamic(
                &format!("{TOOL_PARAM_PREFIX}{name}"),
                path.display().to_string(),
            );
        }
    }

    /// Version information for the known tools.
    pub fn check(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|(name, arg)| match self.get(name) {
                Some(path) => check_tool_with_arg(name, path, arg),
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convforge_common::{ContextKind, Scope};

    #[test]
    fn test_check_tool_not_found() {
        let info = check_tool_with_arg(
            "missing",
            Path::new("nonexistent_tool_12345"),
            "--version",
        );
        assert!(!info.available);
        assert!(info.version.is_none());
        assert!(info.path.is_none());
    }

    #[test]
    fn test_configured_path_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("my-ffmpeg");
        std::fs::write(&fake, "").unwrap();

        let mut configured = BTreeMap::new();
        configured.insert("ffmpeg".to_string(), fake.clone());
        configured.insert("nonexistent_tool_12345".to_string(), dir.path().join("nope"));

        let registry = ToolRegistry::discover(&configured);
        assert_eq!(registry.get("ffmpeg"), Some(fake.as_path()));
        assert!(registry.get("nonexistent_tool_12345").is_none());
    }

    #[test]
    fn test_require_missing() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.require("ffprobe"),
            Err(Error::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_export_to_dynamic() {
        let registry = ToolRegistry::new().with_tool("ffmpeg", "/opt/bin/ffmpeg");
        let mut store = ContextStore::new();
        registry.export(&mut store);

        assert_eq!(
            store
                .get_parameter(ContextKind::Dynamic, &Scope::global(), "tool.ffmpeg")
                .unwrap(),
            "/opt/bin/ffmpeg"
        );
    }
}
