//! Engine configuration.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

//------------ Token ---------------------------------------------------------

/// A configured HSM token.
///
/// Tokens are probed in configuration order during key resolution; a given
/// key locator is expected to exist on exactly one of them.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Token {
    /// The name under which the token is referenced in signer directives.
    pub name: String,

    /// Path to the PKCS#11 module library for this token.
    pub module_path: PathBuf,

    /// The PIN used to open sessions on the token.
    pub pin: String,
}

//------------ EngineConfig --------------------------------------------------

/// The process-wide engine configuration.
///
/// Loaded once at startup and shared read-only between zones.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EngineConfig {
    /// HSM tokens, in the order they are tried during key resolution.
    pub tokens: Vec<Token>,

    /// Directory holding unsigned input zone files.
    pub zone_input_dir: PathBuf,

    /// Directory receiving signed output zone files.
    pub zone_output_dir: PathBuf,

    /// Directory holding the per-zone policy documents.
    pub zone_config_dir: PathBuf,

    /// Directory for temporary working files.
    pub zone_tmp_dir: PathBuf,

    /// Directory holding the external signer tools.
    pub tools_dir: PathBuf,

    /// The zones managed by this engine.
    #[serde(default)]
    pub zones: Vec<String>,
}

impl EngineConfig {
    /// Load the engine configuration from a JSON document.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| format!("unable to open config file {}: {e}", path.display()))?;
        serde_json::from_reader(file)
            .map_err(|e| format!("unable to parse config file {}: {e}", path.display()).into())
    }

    /// The complete path to the external tool `tool_name`.
    pub fn tool_path(&self, tool_name: &str) -> PathBuf {
        self.tools_dir.join(tool_name)
    }
}

//============ Tests =========================================================
