use std::sync::Arc;
use std::thread;

use clap::Args;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::lock::LockManager;
use crate::zone::Zone;

#[derive(Clone, Debug, Args)]
pub struct Sign {
    /// The zones to sign [default: all configured zones]
    #[arg(value_name = "zone")]
    zones: Vec<String>,
}

impl Sign {
    pub fn execute(self, config: Arc<EngineConfig>) -> Result<()> {
        let names = if self.zones.is_empty() {
            config.zones.clone()
        } else {
            for zone in &self.zones {
                crate::ensure!(
                    config.zones.contains(zone),
                    "zone {zone} is not configured"
                );
            }
            self.zones
        };
        crate::ensure!(!names.is_empty(), "no zones configured");

        let mut zones: Vec<Zone> = names
            .into_iter()
            .map(|name| Zone::new(name, config.clone()))
            .collect();

        // One worker per zone; the lock manager keeps concurrent runs of
        // the same zone apart should the zone list ever repeat a name.
        let locks = LockManager::new();
        let failed = thread::scope(|s| {
            let locks = &locks;
            let handles: Vec<_> = zones
                .iter_mut()
                .map(|zone| s.spawn(move || zone.sign(locks)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(false))
                .filter(|ok| !ok)
                .count()
        });

        if failed > 0 {
            crate::bail!("{failed} zone(s) failed to sign");
        }
        Ok(())
    }
}
