//! Pipeline description files.

use anyhow::{Context, Result};
use convforge_engine::Pipeline;
use std::path::Path;

/// Load a pipeline description from a TOML file.
///
/// A pipeline without a `name` is named after the file stem.
pub fn load_pipeline(path: &Path) -> Result<Pipeline> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {:?}", path))?;

    let mut pipeline = parse_pipeline(&content)
        .with_context(|| format!("Failed to parse pipeline file: {:?}", path))?;

    if pipeline.name.is_empty() {
        pipeline.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }

    Ok(pipeline)
}

/// Decode a pipeline description from TOML text.
pub fn parse_pipeline(content: &str) -> Result<Pipeline> {
    Ok(toml::from_str(content)?)
}
