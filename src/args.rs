use std::path::PathBuf;
use std::sync::Arc;

use crate::commands::Command;
use crate::config::EngineConfig;
use crate::error::Result;

#[derive(Clone, Debug, clap::Parser)]
#[command(version, disable_help_subcommand = true)]
pub struct Args {
    /// Engine configuration file
    #[arg(short = 'c', value_name = "file")]
    config: PathBuf,

    /// Log more (repeat for even more)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn execute(self) -> Result<()> {
        let config = Arc::new(EngineConfig::from_file(&self.config)?);
        self.command.execute(config)
    }

    /// The log level the command line asks for.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
