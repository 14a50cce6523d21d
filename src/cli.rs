use clap::{Parser, Subcommand};
use std::path::PathBuf;

use convforge::convert::parse_param;

#[derive(Parser)]
#[command(name = "convforge")]
#[command(author, version, about = "Template-driven media conversion pipelines")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a conversion pipeline against a package
    Convert {
        /// Pipeline description (TOML)
        #[arg(required = true)]
        pipeline: PathBuf,

        /// Package scaffold (JSON)
        #[arg(long, required = true)]
        package: PathBuf,

        /// Working directory for the run (overrides the config)
        #[arg(long)]
        working_dir: Option<PathBuf>,

        /// Extra dynamic parameter, repeatable
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Resolve and log every command without executing
        #[arg(long)]
        dry_run: bool,
    },

    /// Check a pipeline description without running it
    Validate {
        /// Pipeline description (TOML)
        pipeline: PathBuf,
    },

    /// Check that external tools are available
    CheckTools,

    /// Display version information
    Version,
}
