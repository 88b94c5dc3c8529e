use std::sync::Arc;
use std::time::SystemTime;

use clap::Args;

use crate::config::EngineConfig;
use crate::error::{Context, Result};
use crate::zone::Zone;

#[derive(Clone, Debug, Args)]
pub struct Due {}

impl Due {
    pub fn execute(self, config: Arc<EngineConfig>) -> Result<()> {
        let now = SystemTime::now();
        for name in &config.zones {
            let mut zone = Zone::new(name.clone(), config.clone());
            zone.reload_policy()
                .with_context(|| format!("checking zone {name}"))?;
            let due = zone.calc_resign_due(now)?;
            if due > 0 {
                println!("{name}: due in {due}s");
            } else if due < 0 {
                println!("{name}: overdue by {}s", -due);
            } else {
                println!("{name}: due now");
            }
        }
        Ok(())
    }
}
