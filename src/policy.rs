//! Per-zone signing policy.
//!
//! A zone's policy arrives as a JSON spec document (see [`PolicySpec`]) and
//! is parsed into a [`ZonePolicy`]. Parsing validates the denial section: a
//! policy that selects neither NSEC nor NSEC3 is rejected outright instead
//! of leaving the denial stage of the pipeline undefined.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

//------------ Denial --------------------------------------------------------

/// How a zone proves the non-existence of names.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Denial {
    Nsec,
    Nsec3 {
        salt: String,
        iterations: u16,
        algorithm: u8,
    },
}

//------------ SerialMode ----------------------------------------------------

/// The policy deciding the SOA serial written to the signed zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SerialMode {
    /// No override; the serial in the upstream data is preserved.
    Keep,

    /// The current Unix time.
    Unixtime,

    /// The previously emitted serial plus one.
    Counter,

    /// Today's date as YYYYMMDDxx with a two digit counter.
    Datecounter,

    /// An unrecognized mode from the policy document.
    ///
    /// Kept verbatim so the warning at signing time can name it.
    Unknown(String),
}

impl SerialMode {
    fn from_spec(mode: Option<String>) -> Self {
        match mode.as_deref() {
            None => SerialMode::Keep,
            Some("unixtime") => SerialMode::Unixtime,
            Some("counter") => SerialMode::Counter,
            Some("datecounter") => SerialMode::Datecounter,
            Some(other) => SerialMode::Unknown(other.to_string()),
        }
    }
}

//------------ KeyRef --------------------------------------------------------

/// A reference to a key held inside an HSM.
///
/// The key is identified by its opaque locator. Resolution against the
/// configured tokens fills in [`KeyRef::resolved`]; the fields of a
/// [`ResolvedKey`] are only ever present together.
#[derive(Clone, Debug)]
pub struct KeyRef {
    pub locator: String,
    pub algorithm: u8,
    pub flags: u16,
    pub ttl: u32,

    /// The resolution result, memoized for the lifetime of the policy.
    pub resolved: Option<ResolvedKey>,
}

/// The details of a key found on a token.
#[derive(Clone, Debug)]
pub struct ResolvedKey {
    /// The token the key was found on.
    pub token_name: String,

    /// The PKCS#11 module path of that token.
    pub module_path: PathBuf,

    /// The PIN of that token.
    pub pin: String,

    /// The identifier the signer uses to reference the key.
    pub tool_key_id: String,

    /// The DNSKEY resource record text returned by the generator tool.
    pub dnskey_rr: String,
}

//------------ ZonePolicy ----------------------------------------------------

/// Everything the engine needs to know to sign one zone.
///
/// Replaced wholesale when the policy document changes; replacing it drops
/// all memoized key resolution state with it.
#[derive(Clone, Debug)]
pub struct ZonePolicy {
    pub denial: Denial,
    pub soa_ttl: Option<u32>,
    pub soa_minimum: Option<u32>,
    pub soa_serial: SerialMode,
    pub signatures_resign_interval: Duration,
    pub publish_keys: Vec<KeyRef>,
    pub signature_keys: Vec<KeyRef>,
}

impl ZonePolicy {
    /// Load a zone policy from its spec document.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| format!("unable to open policy file {}: {e}", path.display()))?;
        let spec: PolicySpec = serde_json::from_reader(file)
            .map_err(|e| format!("unable to parse policy file {}: {e}", path.display()))?;
        spec.parse()
    }
}

//------------ PolicySpec ----------------------------------------------------

/// The on-disk form of a zone policy document.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PolicySpec {
    /// Use an NSEC chain for denial of existence.
    #[serde(default)]
    pub denial_nsec: bool,

    /// Use an NSEC3 chain for denial of existence.
    #[serde(default)]
    pub denial_nsec3: Option<Nsec3Spec>,

    /// Override for the SOA TTL.
    #[serde(default)]
    pub soa_ttl: Option<u32>,

    /// Override for the SOA minimum.
    #[serde(default)]
    pub soa_minimum: Option<u32>,

    /// The SOA serial mode; absent means the upstream serial is kept.
    #[serde(default)]
    pub soa_serial: Option<String>,

    /// Seconds after which a signed zone must be signed again.
    pub signatures_resign_interval: u64,

    /// Keys published in the zone as DNSKEY records.
    #[serde(default)]
    pub publish_keys: Vec<KeySpec>,

    /// Keys producing signatures over the zone.
    #[serde(default)]
    pub signature_keys: Vec<KeySpec>,
}

/// The NSEC3 parameters of a policy document.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Nsec3Spec {
    pub salt: String,
    pub iterations: u16,
    pub algorithm: u8,
}

/// A key entry of a policy document.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct KeySpec {
    pub locator: String,
    pub algorithm: u8,
    pub flags: u16,
    pub ttl: u32,
}

impl PolicySpec {
    /// Parse the spec into a [`ZonePolicy`].
    pub fn parse(self) -> Result<ZonePolicy> {
        let denial = match (self.denial_nsec, self.denial_nsec3) {
            (true, None) => Denial::Nsec,
            (false, Some(nsec3)) => Denial::Nsec3 {
                salt: nsec3.salt,
                iterations: nsec3.iterations,
                algorithm: nsec3.algorithm,
            },
            (true, Some(_)) => {
                crate::bail!("zone policy specifies both NSEC and NSEC3 denial")
            }
            (false, None) => {
                crate::bail!("zone policy specifies neither NSEC nor NSEC3 denial")
            }
        };

        Ok(ZonePolicy {
            denial,
            soa_ttl: self.soa_ttl,
            soa_minimum: self.soa_minimum,
            soa_serial: SerialMode::from_spec(self.soa_serial),
            signatures_resign_interval: Duration::from_secs(self.signatures_resign_interval),
            publish_keys: self.publish_keys.into_iter().map(KeySpec::parse).collect(),
            signature_keys: self
                .signature_keys
                .into_iter()
                .map(KeySpec::parse)
                .collect(),
        })
    }
}

impl KeySpec {
    fn parse(self) -> KeyRef {
        KeyRef {
            locator: self.locator,
            algorithm: self.algorithm,
            flags: self.flags,
            ttl: self.ttl,
            resolved: None,
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<ZonePolicy> {
        let spec: PolicySpec = serde_json::from_str(json).unwrap();
        spec.parse()
    }

    #[test]
    fn nsec3_policy() {
        let policy = parse(
            r#"{
                "denial-nsec3": { "salt": "aabb", "iterations": 5, "algorithm": 1 },
                "soa-ttl": 3600,
                "soa-serial": "datecounter",
                "signatures-resign-interval": 86400,
                "publish-keys": [
                    { "locator": "deadbeef", "algorithm": 8, "flags": 257, "ttl": 3600 }
                ],
                "signature-keys": [
                    { "locator": "deadbeef", "algorithm": 8, "flags": 257, "ttl": 3600 }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            policy.denial,
            Denial::Nsec3 {
                salt: "aabb".to_string(),
                iterations: 5,
                algorithm: 1
            }
        );
        assert_eq!(policy.soa_ttl, Some(3600));
        assert_eq!(policy.soa_minimum, None);
        assert_eq!(policy.soa_serial, SerialMode::Datecounter);
        assert_eq!(
            policy.signatures_resign_interval,
            Duration::from_secs(86400)
        );
        assert_eq!(policy.publish_keys.len(), 1);
        assert!(policy.publish_keys[0].resolved.is_none());
    }

    #[test]
    fn nsec_policy() {
        let policy = parse(
            r#"{
                "denial-nsec": true,
                "signatures-resign-interval": 600
            }"#,
        )
        .unwrap();
        assert_eq!(policy.denial, Denial::Nsec);
        assert_eq!(policy.soa_serial, SerialMode::Keep);
    }

    #[test]
    fn rejects_missing_denial() {
        let err = parse(r#"{ "signatures-resign-interval": 600 }"#).unwrap_err();
        assert!(err.to_string().contains("neither NSEC nor NSEC3"));
    }

    #[test]
    fn rejects_conflicting_denial() {
        let err = parse(
            r#"{
                "denial-nsec": true,
                "denial-nsec3": { "salt": "", "iterations": 0, "algorithm": 1 },
                "signatures-resign-interval": 600
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("both NSEC and NSEC3"));
    }

    #[test]
    fn unknown_serial_mode_is_preserved() {
        let policy = parse(
            r#"{
                "denial-nsec": true,
                "soa-serial": "lunartime",
                "signatures-resign-interval": 600
            }"#,
        )
        .unwrap();
        assert_eq!(
            policy.soa_serial,
            SerialMode::Unknown("lunartime".to_string())
        );
    }
}
