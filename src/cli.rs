use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Terminal AI coding assistant
#[derive(Debug, Parser)]
#[command(name = "flux")]
#[command(version)]
#[command(about = "Terminal AI coding assistant", long_about = None)]
pub struct Args {
    /// Model name (overrides config and provider default)
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Provider (default: config/provider or "ollama")
    #[arg(short = 'p', long = "provider")]
    pub provider: Option<String>,

    /// System prompt for this run
    #[arg(long = "system")]
    pub system: Option<String>,

    /// Wait for the whole answer instead of streaming it
    #[arg(long = "no-stream")]
    pub no_stream: bool,

    /// Config file (default: $FLUX_HOME/config/config.toml or ~/.config/flux/config.toml)
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List known providers and the ones configured
    Providers,

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}
