//! Wiring for one conversion run: config, pipeline, package, tools, probe,
//! then the engine.

use anyhow::{Context, Result};
use convforge_engine::{probe, ConversionEngine, ExecEnv, ToolRegistry, Workspace};
use std::path::PathBuf;

use crate::config::Config;
use crate::package::load_package;
use crate::pipeline::load_pipeline;

/// Inputs of a `convert` invocation.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub pipeline: PathBuf,
    pub package: PathBuf,
    /// Overrides the configured working directory.
    pub working_dir: Option<PathBuf>,
    /// Extra dynamic parameters; these win over configured ones.
    pub params: Vec<(String, String)>,
    pub dry_run: bool,
}

/// Parse a `KEY=VALUE` command-line parameter.
pub fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Run a pipeline against a package.
pub async fn convert(config: &Config, options: &ConvertOptions) -> Result<()> {
    let pipeline = load_pipeline(&options.pipeline)?;
    convforge_engine::validate(&pipeline)
        .with_context(|| format!("Invalid pipeline: {:?}", options.pipeline))?;

    let mut store = load_package(&options.package)?.into_store()?;

    let working_dir = options.working_dir.as_ref().or(config.working_dir.as_ref());
    let workspace = match working_dir {
        Some(dir) => Workspace::new(dir, config.log_dir.as_deref()),
        None => Workspace::temporary(config.log_dir.as_deref()),
    }
    .context("Failed to prepare working directory")?;

    tracing::info!(
        "Converting with pipeline '{}' in {:?} (logs in {:?})",
        pipeline.name,
        workspace.working_dir(),
        workspace.log_dir()
    );

    let tools = ToolRegistry::discover(&config.tools.configured());
    tools.export(&mut store);

    for (name, value) in &config.parameters {
        store.set_dynamic(name, value.clone());
    }
    for (name, value) in &options.params {
        store.set_dynamic(name, value.clone());
    }

    if config.probe.enabled && !options.dry_run {
        probe::populate(&mut store, &tools, &workspace)
            .await
            .context("Failed to probe package resources")?;
    }

    let env = ExecEnv::new(workspace).dry_run(options.dry_run);
    let mut engine = ConversionEngine::new(store, env).with_cleanup(config.cleanup.enabled);
    engine.run(&pipeline).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("lang=en=US").unwrap(),
            ("lang".to_string(), "en=US".to_string())
        );
        assert_eq!(
            parse_param("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }
}
