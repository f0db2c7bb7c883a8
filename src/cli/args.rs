//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// solvebridge - inspect build graphs the way the solver bridge loads them
///
/// Applies source policies, entitlement checks and platform normalization
/// to a serialized build graph without running it.
#[derive(Parser, Debug)]
#[command(name = "solvebridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SOLVEBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a build graph definition and list its vertices
    Inspect(InspectArgs),

    /// Validate or evaluate source policies
    Policy(PolicyArgs),

    /// Print the key a cache source is shared under
    CacheKey(CacheKeyArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// JSON-encoded build graph definition
    pub definition: PathBuf,

    /// Source policy applied after the configured one (repeatable)
    #[arg(short, long = "policy", value_name = "FILE")]
    pub policies: Vec<PathBuf>,

    /// Grant an entitlement in addition to the configured ones (repeatable)
    #[arg(short, long = "allow", value_name = "ENTITLEMENT")]
    pub allow: Vec<String>,

    /// Default platform as os/arch[/variant]
    #[arg(long)]
    pub platform: Option<String>,
}

/// Arguments for the policy command
#[derive(Parser, Debug)]
pub struct PolicyArgs {
    #[command(subcommand)]
    pub action: PolicyAction,
}

/// Policy subcommands
#[derive(Subcommand, Debug)]
pub enum PolicyAction {
    /// Validate policy files
    Check {
        /// Policy files to validate
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Evaluate a source identifier against a policy
    Eval {
        /// Policy file
        file: PathBuf,

        /// Source identifier, e.g. docker-image://docker.io/library/alpine:latest
        identifier: String,
    },
}

/// Arguments for the cache-key command
#[derive(Parser, Debug)]
pub struct CacheKeyArgs {
    /// Cache source type (registry, local, gha, ...)
    #[arg(short = 't', long = "type")]
    pub kind: String,

    /// Cache source attribute (repeatable)
    #[arg(short, long = "attr", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub attrs: Vec<(String, String)>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}
