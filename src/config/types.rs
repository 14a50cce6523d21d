use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Directory processes run in; a temporary one is created when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Where diagnostic logs go (default: `<working_dir>/logs`).
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Extra dynamic parameters available to every pipeline.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    #[serde(default)]
    pub mkvmerge_path: Option<PathBuf>,

    #[serde(default)]
    pub sox_path: Option<PathBuf>,
}

impl ToolsConfig {
    /// Configured paths keyed by tool name, with `~` expanded.
    pub fn configured(&self) -> BTreeMap<String, PathBuf> {
        [
            ("ffmpeg", &self.ffmpeg_path),
            ("ffprobe", &self.ffprobe_path),
            ("mkvmerge", &self.mkvmerge_path),
            ("sox", &self.sox_path),
        ]
        .into_iter()
        .filter_map(|(name, path)| {
            let path = path.as_ref()?;
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            Some((name.to_string(), PathBuf::from(expanded)))
        })
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Probe resource essences with ffprobe before running (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanupConfig {
    /// Remove cleanup-flagged files after the run (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}
