//! Zones and how to sign them.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{error, info};

use crate::config::EngineConfig;
use crate::error::{Context, Result};
use crate::lock::LockManager;
use crate::pipeline::{self, ZonePaths};
use crate::policy::ZonePolicy;

//------------ Zone ----------------------------------------------------------

/// A zone under the engine's management, with everything needed to sign it.
///
/// Created once per configured zone name and kept for the process lifetime.
/// The policy is loaded from the zone's policy document and replaced
/// wholesale whenever that document changes.
#[derive(Debug)]
pub struct Zone {
    name: String,
    config: Arc<EngineConfig>,
    pub(crate) policy: Option<ZonePolicy>,
    policy_loaded: Option<SystemTime>,
}

impl Zone {
    pub fn new(name: impl Into<String>, config: Arc<EngineConfig>) -> Self {
        Self {
            name: name.into(),
            config,
            policy: None,
            policy_loaded: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> Option<&ZonePolicy> {
        self.policy.as_ref()
    }

    /// The file name of the unsigned input zone.
    pub fn input_path(&self) -> PathBuf {
        self.config.zone_input_dir.join(&self.name)
    }

    /// The file name of the final signed output zone.
    pub fn output_path(&self) -> PathBuf {
        self.config
            .zone_output_dir
            .join(format!("{}.signed", self.name))
    }

    /// The file name of the zone's policy document.
    pub fn policy_path(&self) -> PathBuf {
        self.config
            .zone_config_dir
            .join(format!("{}.xml", self.name))
    }

    /// The file name of the temporary sorted zone.
    pub fn tmp_path(&self) -> PathBuf {
        self.config.zone_tmp_dir.join(&self.name)
    }

    /// The files used by a signing run of this zone.
    pub fn paths(&self) -> ZonePaths {
        ZonePaths {
            input: self.input_path(),
            sorted: self.tmp_path(),
            staged: self
                .config
                .zone_tmp_dir
                .join(format!("{}.signed", self.name)),
            output: self.output_path(),
        }
    }

    /// Load the zone's policy document if it changed since the last load.
    ///
    /// Returns whether a (re)load happened. Replacing the policy drops all
    /// memoized key resolution state with it.
    pub fn reload_policy(&mut self) -> Result<bool> {
        let path = self.policy_path();
        let modified = fs::metadata(&path)
            .and_then(|metadata| metadata.modified())
            .map_err(|e| format!("unable to stat policy file {}: {e}", path.display()))?;
        if let Some(loaded) = self.policy_loaded {
            if modified <= loaded {
                return Ok(false);
            }
        }
        let policy = ZonePolicy::from_file(&path)
            .with_context(|| format!("loading policy for zone {}", self.name))?;
        self.policy = Some(policy);
        self.policy_loaded = Some(modified);
        info!("loaded policy for zone {}", self.name);
        Ok(true)
    }

    /// Sign the zone.
    ///
    /// Holds the zone's lock for the duration of the run. A failed run is
    /// logged and reported as `false`; the engine carries on and a later
    /// scheduling attempt retries. The lock is released on every exit path.
    pub fn sign(&mut self, locks: &LockManager) -> bool {
        let _guard = locks.lock(&self.name);
        match self.run_pipeline() {
            Ok(()) => {
                info!("done signing {}", self.name);
                true
            }
            Err(err) => {
                err.log();
                error!("signing zone {} failed", self.name);
                false
            }
        }
    }

    fn run_pipeline(&mut self) -> Result<()> {
        self.reload_policy()?;
        let paths = self.paths();
        let config = self.config.clone();
        let name = self.name.clone();
        let Some(policy) = self.policy.as_mut() else {
            crate::bail!("no policy loaded for zone {name}");
        };
        pipeline::run(&config, policy, &name, &paths)
    }

    /// Seconds until the zone should be signed again.
    ///
    /// Zero means due immediately (no signed output exists yet); a negative
    /// value means the zone is overdue.
    pub fn calc_resign_due(&self, now: SystemTime) -> Result<i64> {
        let Some(policy) = &self.policy else {
            crate::bail!("no policy loaded for zone {}", self.name);
        };
        let mtime = match fs::metadata(self.output_path()).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => return Ok(0),
        };
        let due = mtime + policy.signatures_resign_interval;
        Ok(match due.duration_since(now) {
            Ok(ahead) => ahead.as_secs() as i64,
            Err(err) => -(err.duration().as_secs() as i64),
        })
    }
}

//--- PartialEq, Eq

impl PartialEq for Zone {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Zone {}

//============ Tests =========================================================
