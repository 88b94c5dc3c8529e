//! A sandbox for pipeline tests.
//!
//! Builds the engine's directory layout in a temp dir and installs small
//! shell scripts in place of the external signer tools. The sorter and
//! signer stubs record what they receive on stdin so tests can check what
//! went over the pipeline.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use signd::config::{EngineConfig, Token};

pub struct Fixture {
    pub dir: TempDir,
    pub config: Arc<EngineConfig>,
}

impl Fixture {
    pub fn new(tokens: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let config = EngineConfig {
            tokens: tokens
                .iter()
                .map(|name| Token {
                    name: name.to_string(),
                    module_path: PathBuf::from("/usr/lib/softhsm2.so"),
                    pin: "1234".to_string(),
                })
                .collect(),
            zone_input_dir: root.join("unsigned"),
            zone_output_dir: root.join("signed"),
            zone_config_dir: root.join("zones"),
            zone_tmp_dir: root.join("tmp"),
            tools_dir: root.join("tools"),
            zones: vec!["example.com".to_string()],
        };
        for dir in [
            &config.zone_input_dir,
            &config.zone_output_dir,
            &config.zone_config_dir,
            &config.zone_tmp_dir,
            &config.tools_dir,
        ] {
            fs::create_dir_all(dir).unwrap();
        }
        Self {
            dir,
            config: Arc::new(config),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Install a stub tool; the body runs under /bin/sh.
    pub fn write_tool(&self, name: &str, body: &str) {
        let path = self.config.tools_dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Install passthrough stubs for the whole tool chain.
    ///
    /// Records arrive unchanged at the far end; the sorter and signer leave
    /// copies of their stdin in `sorter.in` and `signer.in` under the
    /// fixture root. The serial extractor fails (no prior serials) and the
    /// DNSKEY generator succeeds on the first token.
    pub fn install_passthrough_tools(&self) {
        let root = self.root().display();
        self.write_tool("sorter", &format!("exec tee \"{root}/sorter.in\""));
        self.write_tool("stripper", "exec cat \"$4\"");
        self.write_tool("nseccer", "exec cat");
        self.write_tool("nsec3er", "exec cat");
        self.write_tool("signer_pkcs11", &format!("exec tee \"{root}/signer.in\""));
        self.write_tool("get_serial", "exit 1");
        self.write_tool(
            "create_dnskey_pkcs11",
            "echo \"example.com. 3600 IN DNSKEY 257 3 8 AwEAAexample==\"",
        );
    }

    pub fn write_input_zone(&self, zone: &str, content: &str) {
        fs::write(self.config.zone_input_dir.join(zone), content).unwrap();
    }

    pub fn write_policy(&self, zone: &str, json: &str) {
        fs::write(
            self.config.zone_config_dir.join(format!("{zone}.xml")),
            json,
        )
        .unwrap();
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.root().join(name)).unwrap()
    }
}
