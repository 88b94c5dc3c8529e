//! The commands of _signd_.
pub mod due;
pub mod sign;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::Result;

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Sign zones now
    ///
    /// Runs the full signing pipeline for the named zones, or for every
    /// configured zone when no names are given. Zones are signed on
    /// parallel workers; at most one run touches a given zone at a time.
    #[command(name = "sign")]
    Sign(self::sign::Sign),

    /// Show when each zone is due for resigning
    #[command(name = "due")]
    Due(self::due::Due),
}

impl Command {
    pub fn execute(self, config: Arc<EngineConfig>) -> Result<()> {
        match self {
            Self::Sign(sign) => sign.execute(config),
            Self::Due(due) => due.execute(config),
        }
    }
}
