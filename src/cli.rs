use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "logvault")]
#[command(about = "LogVault log shipping CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ship stdin lines until EOF or Ctrl+C, then print a metrics snapshot
    Ship(ConfigArgs),
    /// Run one fallback retry round and print its report
    Retry(ConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file (defaults to $LOGVAULT_CONFIG or config/logvault.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
