mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./convforge.toml",
        "~/.config/convforge/config.toml",
        "/etc/convforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn expand_paths(config: &mut Config) {
    if let Some(dir) = config.working_dir.as_mut() {
        *dir = expand(dir);
    }
    if let Some(dir) = config.log_dir.as_mut() {
        *dir = expand(dir);
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if let Some(log_dir) = &config.log_dir {
        if log_dir.is_file() {
            anyhow::bail!("log_dir {:?} is a file", log_dir);
        }
    }

    if let Some(dir) = &config.working_dir {
        if !dir.exists() {
            tracing::warn!("Working directory does not exist yet: {:?}", dir);
        }
    }

    for name in config.parameters.keys() {
        if name.trim().is_empty() {
            anyhow::bail!("Parameter names cannot be empty");
        }
    }

    Ok(())
}
