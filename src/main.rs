//! solvebridge - offline tooling over the solver bridge
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use solvebridge::cli::{commands, Cli, Commands};
use solvebridge::config::ConfigManager;
use solvebridge::error::BridgeResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            for location in e.source_locations() {
                eprintln!("  {} {}", style("-->").blue(), location);
            }
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> BridgeResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug; the config file can raise the floor to info
    let verbose = cli.verbose.max(u8::from(config.general.verbose));
    let filter = match verbose {
        0 => EnvFilter::new("solvebridge=warn"),
        1 => EnvFilter::new("solvebridge=info"),
        _ => EnvFilter::new("solvebridge=debug"),
    };

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Inspect(args) => commands::inspect(args, &config).await,
        Commands::Policy(args) => commands::policy(args, &config).await,
        Commands::CacheKey(args) => commands::cache_key(args, &config).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}
