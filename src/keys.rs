//! Key resolution against HSM tokens.
//!
//! A [`KeyRef`] names a key by its opaque locator only. To use the key the
//! engine needs the token it lives on, that token's module and PIN, and the
//! DNSKEY record publishing it. All of that comes out of the external
//! `create_dnskey_pkcs11` tool, tried against each configured token in
//! order. A locator is expected to exist on exactly one token, so the first
//! token whose invocation succeeds wins.

use std::process::{Command, Stdio};

use tracing::{debug, error, info};

use crate::config::EngineConfig;
use crate::policy::{KeyRef, ResolvedKey};

/// The tool producing DNSKEY records from HSM-held keys.
const CREATE_DNSKEY: &str = "create_dnskey_pkcs11";

//------------ KeyResolver ---------------------------------------------------

/// Resolves key locators against the engine's configured tokens.
pub struct KeyResolver<'a> {
    config: &'a EngineConfig,
}

impl<'a> KeyResolver<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Fill in the details of `key` by querying all configured tokens.
    ///
    /// Returns whether the key is resolved afterwards. Resolution is
    /// memoized on the key: a key that is already resolved is not queried
    /// again. On failure the key stays unresolved and the caller decides
    /// how bad that is.
    pub fn resolve(&self, key: &mut KeyRef, zone: &str) -> bool {
        if key.resolved.is_some() {
            return true;
        }

        debug!("generating DNSKEY rr for {}", key.locator);
        let tool = self.config.tool_path(CREATE_DNSKEY);
        for token in &self.config.tokens {
            debug!("trying token {}", token.name);
            let output = match Command::new(&tool)
                .args(["-n", token.name.as_str()])
                .arg("-m")
                .arg(&token.module_path)
                .args(["-p", token.pin.as_str()])
                .args(["-o", zone])
                .arg("-a")
                .arg(key.algorithm.to_string())
                .arg("-f")
                .arg(key.flags.to_string())
                .arg("-t")
                .arg(key.ttl.to_string())
                .arg(&key.locator)
                .stdin(Stdio::null())
                .output()
            {
                Ok(output) => output,
                Err(err) => {
                    error!("unable to run {}: {err}", tool.display());
                    continue;
                }
            };

            for line in String::from_utf8_lossy(&output.stderr).lines() {
                error!("create_dnskey stderr: {line}");
            }
            debug!("create_dnskey status: {}", output.status);
            if !output.status.success() {
                continue;
            }

            // The last line of output is the DNSKEY record.
            let stdout = String::from_utf8_lossy(&output.stdout);
            let Some(dnskey) = stdout.lines().rev().find(|line| !line.trim().is_empty())
            else {
                error!(
                    "create_dnskey produced no DNSKEY for {} on token {}",
                    key.locator, token.name
                );
                continue;
            };

            key.resolved = Some(ResolvedKey {
                token_name: token.name.clone(),
                module_path: token.module_path.clone(),
                pin: token.pin.clone(),
                tool_key_id: format!("{}_{}", key.locator, key.algorithm),
                dnskey_rr: dnskey.to_string(),
            });
            info!("found key {} in token {}", key.locator, token.name);
            return true;
        }
        false
    }
}

//============ Tests =========================================================
