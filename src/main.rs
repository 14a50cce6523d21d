mod cli;

use convforge::{config, convert, pipeline};
use convforge_engine::ToolRegistry;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "convforge=trace,convforge_engine=trace,convforge_common=debug".to_string()
        } else {
            "convforge=debug,convforge_engine=debug".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Convert {
            pipeline,
            package,
            working_dir,
            params,
            dry_run,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let options = convert::ConvertOptions {
                pipeline,
                package,
                working_dir,
                params,
                dry_run,
            };

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert::convert(&config, &options))?;
            if dry_run {
                println!("[DRY RUN] Pipeline resolved, no processes started");
            } else {
                println!("Conversion complete");
            }
            Ok(())
        }
        Commands::Validate { pipeline } => validate_pipeline(&pipeline),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Version => {
            println!("convforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_pipeline(path: &std::path::Path) -> Result<()> {
    println!("Validating pipeline: {:?}", path);
    let pipeline = pipeline::load_pipeline(path)?;
    convforge_engine::validate(&pipeline)?;

    println!("✓ Pipeline '{}' is valid", pipeline.name);
    println!("  Operations: {}", pipeline.operations.len());
    for (i, op) in pipeline.operations.iter().enumerate() {
        println!("    {}. {}", i + 1, op.kind());
    }
    Ok(())
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools.configured()).check();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All tools are available!");
    } else {
        println!("Some tools are missing. Pipelines using them will fail.");
    }

    Ok(())
}
