//! The signing pipeline.
//!
//! Signing a zone chains four external tools: the sorter brings the zone
//! into signing order (with the published DNSKEYs added up front), the
//! stripper removes old DNSSEC records, the denial stage adds the NSEC or
//! NSEC3 chain, and the signer produces the signed zone. The sorter's
//! output is buffered in a temporary file; the remaining stages run with
//! overlapping lifetimes, connected by pipes.
//!
//! The signer is driven over a line-oriented control protocol: directives
//! first, record data after. [`SignerControl`] encodes the directives so
//! the wire contract lives in one place.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{Context, Result};
use crate::keys::KeyResolver;
use crate::policy::{Denial, SerialMode, ZonePolicy};
use crate::serial;

//------------ Tool names ----------------------------------------------------

const SORTER: &str = "sorter";
const STRIPPER: &str = "stripper";
const NSECCER: &str = "nseccer";
const NSEC3ER: &str = "nsec3er";
const SIGNER: &str = "signer_pkcs11";
const GET_SERIAL: &str = "get_serial";

//------------ ZonePaths -----------------------------------------------------

/// The files one signing run reads and writes.
#[derive(Clone, Debug)]
pub struct ZonePaths {
    /// The unsigned input zone.
    pub input: PathBuf,

    /// The sorted zone produced by the sort stage.
    pub sorted: PathBuf,

    /// Where the signer's output is staged during the run.
    pub staged: PathBuf,

    /// The final signed zone.
    pub output: PathBuf,
}

//------------ ToolProcess ---------------------------------------------------

/// An external tool running with piped stdio.
///
/// Standard error is drained to the log from a separate thread as soon as
/// the tool starts, so a stage can never block on a full stderr buffer,
/// not even while the run is failing.
#[derive(Debug)]
pub struct ToolProcess {
    name: &'static str,
    cmdline: String,
    child: Child,
}

impl ToolProcess {
    /// Spawn `tool` with piped stdout and the given stdin.
    pub fn spawn(
        name: &'static str,
        tool: PathBuf,
        args: Vec<OsString>,
        stdin: Stdio,
    ) -> Result<Self> {
        let cmdline = std::iter::once(tool.display().to_string())
            .chain(args.iter().map(|arg| arg.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ");
        let child = Command::new(&tool)
            .args(&args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("unable to run {name} ({cmdline}): {e}"))?;
        let mut process = Self {
            name,
            cmdline,
            child,
        };
        process.drain_stderr();
        Ok(process)
    }

    /// The command line, for error reporting.
    pub fn command_line(&self) -> &str {
        &self.cmdline
    }

    /// Take the tool's input stream.
    pub fn stdin(&mut self) -> Result<ChildStdin> {
        self.child
            .stdin
            .take()
            .ok_or_else(|| format!("stdin of {} already taken", self.name).into())
    }

    /// Take the tool's output stream.
    pub fn stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| format!("stdout of {} already taken", self.name).into())
    }

    fn drain_stderr(&mut self) {
        let Some(stderr) = self.child.stderr.take() else {
            return;
        };
        let name = self.name;
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) => warn!("{name} stderr: {line}"),
                    Err(_) => break,
                }
            }
        });
    }

    /// Wait for the tool to exit.
    pub fn wait(mut self) -> Result<ExitStatus> {
        self.child
            .wait()
            .map_err(|e| format!("unable to wait for {}: {e}", self.name).into())
    }

    /// Wait for the tool to exit and require a zero exit status.
    pub fn wait_success(self) -> Result<()> {
        let name = self.name;
        let cmdline = self.cmdline.clone();
        let status = self.wait()?;
        if !status.success() {
            return Err(format!("{name} exited with {status} (command was: {cmdline})").into());
        }
        Ok(())
    }
}

//------------ SignerControl -------------------------------------------------

/// Encoder for the signer's line-oriented control protocol.
///
/// One method per directive kind. The signer expects the origin before any
/// key directives and all directives before the record stream starts.
pub struct SignerControl<W> {
    out: W,
}

impl<W: Write> SignerControl<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// The blank line opening a signer conversation.
    pub fn preamble(&mut self) -> io::Result<()> {
        writeln!(self.out)
    }

    pub fn origin(&mut self, zone: &str) -> io::Result<()> {
        writeln!(self.out, ":origin {zone}")
    }

    pub fn soa_ttl(&mut self, ttl: u32) -> io::Result<()> {
        writeln!(self.out, ":soa_ttl {ttl}")
    }

    pub fn soa_minimum(&mut self, minimum: u32) -> io::Result<()> {
        writeln!(self.out, ":soa_minimum {minimum}")
    }

    pub fn soa_serial(&mut self, serial: u32) -> io::Result<()> {
        writeln!(self.out, ":soa_serial {serial}")
    }

    pub fn add_module(&mut self, token: &str, module_path: &Path, pin: &str) -> io::Result<()> {
        writeln!(
            self.out,
            ":add_module {token} {} {pin}",
            module_path.display()
        )
    }

    pub fn add_key(&mut self, token: &str, key_id: &str, algorithm: u8, flags: u16) -> io::Result<()> {
        writeln!(self.out, ":add_key {token} {key_id} {algorithm} {flags}")
    }

    /// Hand back the underlying stream for the record data.
    pub fn into_inner(self) -> W {
        self.out
    }
}

//------------ run -----------------------------------------------------------

/// Run the complete signing pipeline for one zone.
///
/// The signed zone is staged in the temporary directory and only renamed
/// onto the output path once every stage has finished successfully, so a
/// failed run never leaves a partially written output file behind.
pub fn run(
    config: &EngineConfig,
    policy: &mut ZonePolicy,
    zone: &str,
    paths: &ZonePaths,
) -> Result<()> {
    sort(config, policy, zone, paths)?;

    info!("signing zone: {zone}");
    let mut stripper = ToolProcess::spawn(
        STRIPPER,
        config.tool_path(STRIPPER),
        vec![
            "-o".into(),
            zone.into(),
            "-f".into(),
            paths.sorted.clone().into(),
        ],
        Stdio::null(),
    )?;
    let strip_out = stripper.stdout()?;

    let mut denial = match &policy.denial {
        Denial::Nsec => ToolProcess::spawn(
            NSECCER,
            config.tool_path(NSECCER),
            Vec::new(),
            Stdio::from(strip_out),
        )?,
        Denial::Nsec3 {
            salt,
            iterations,
            algorithm,
        } => ToolProcess::spawn(
            NSEC3ER,
            config.tool_path(NSEC3ER),
            vec![
                "-o".into(),
                zone.into(),
                "-s".into(),
                salt.clone().into(),
                "-t".into(),
                iterations.to_string().into(),
                "-a".into(),
                algorithm.to_string().into(),
            ],
            Stdio::from(strip_out),
        )?,
    };
    let denial_out = denial.stdout()?;

    let mut signer = ToolProcess::spawn(
        SIGNER,
        config.tool_path(SIGNER),
        Vec::new(),
        Stdio::piped(),
    )?;
    let signer_in = signer.stdin()?;
    let mut signer_out = signer.stdout()?;

    feed_signer(config, policy, zone, paths, signer_in, denial_out).with_context(|| {
        format!(
            "feeding the signer for zone {zone} (command was: {})",
            signer.command_line()
        )
    })?;

    let mut staged = File::create(&paths.staged).map_err(|e| {
        format!(
            "unable to create staged output file {}: {e}",
            paths.staged.display()
        )
    })?;
    io::copy(&mut signer_out, &mut staged)
        .map_err(|e| format!("unable to read signer output for zone {zone}: {e}"))?;

    stripper.wait_success()?;
    denial.wait_success()?;
    signer.wait_success()?;

    fs::rename(&paths.staged, &paths.output).map_err(|e| {
        format!(
            "unable to move {} to {}: {e}",
            paths.staged.display(),
            paths.output.display()
        )
    })?;
    Ok(())
}

/// Write the control directives and the denial stage's records to the
/// signer, then close its input.
///
/// The origin goes first, key directives after it, the record stream last;
/// the signer relies on that order. Closing the input before the output is
/// read keeps the pipe buffers from deadlocking.
fn feed_signer(
    config: &EngineConfig,
    policy: &mut ZonePolicy,
    zone: &str,
    paths: &ZonePaths,
    signer_in: ChildStdin,
    mut denial_out: ChildStdout,
) -> Result<()> {
    let mut control = SignerControl::new(BufWriter::new(signer_in));
    control.preamble()?;
    debug!("send to signer: :origin {zone}");
    control.origin(zone)?;

    if let Some(ttl) = policy.soa_ttl {
        control.soa_ttl(ttl)?;
    }
    if let Some(minimum) = policy.soa_minimum {
        control.soa_minimum(minimum)?;
    }
    if let Some(serial) = serial_for_run(config, policy, paths) {
        debug!("set serial to {serial}");
        control.soa_serial(serial)?;
    }

    let resolver = KeyResolver::new(config);
    for key in &mut policy.signature_keys {
        debug!("use signature key: {}", key.locator);
        if key.resolved.is_none() {
            debug!("no information yet for key {}", key.locator);
            resolver.resolve(key, zone);
        }
        match &key.resolved {
            Some(found) => {
                control.add_module(&found.token_name, &found.module_path, &found.pin)?;
                control.add_key(&found.token_name, &found.tool_key_id, key.algorithm, key.flags)?;
            }
            // The signature set degrades; monitoring has to catch this.
            None => warn!("no token for key {}", key.locator),
        }
    }

    let mut signer_in = control.into_inner();
    io::copy(&mut denial_out, &mut signer_in)
        .map_err(|e| format!("unable to stream records to the signer: {e}"))?;
    signer_in.flush()?;
    Ok(())
}

/// Decide the serial override for this run.
///
/// Prior serials are read here, before any output is written, and only for
/// the modes that use them.
fn serial_for_run(config: &EngineConfig, policy: &ZonePolicy, paths: &ZonePaths) -> Option<u32> {
    let tool = config.tool_path(GET_SERIAL);
    let (prior_output, prior_input) = match policy.soa_serial {
        SerialMode::Counter => (
            serial::extract(&tool, &paths.output),
            serial::extract(&tool, &paths.input),
        ),
        SerialMode::Datecounter => (serial::extract(&tool, &paths.output), None),
        _ => (None, None),
    };
    serial::compute(&policy.soa_serial, prior_output, prior_input, Utc::now())
}

//------------ sort ----------------------------------------------------------

/// Sort the zone into signing order.
///
/// The sorter reads the published DNSKEY records followed by the raw
/// unsigned zone on stdin; its output is buffered in the temporary sorted
/// zone file for the strip stage. A key that cannot be resolved degrades
/// to a comment line; an I/O failure here aborts the whole run.
fn sort(
    config: &EngineConfig,
    policy: &mut ZonePolicy,
    zone: &str,
    paths: &ZonePaths,
) -> Result<()> {
    info!("sorting zone: {zone}");
    let mut args: Vec<OsString> = Vec::new();
    if let Denial::Nsec3 {
        salt,
        iterations,
        algorithm,
    } = &policy.denial
    {
        args.extend([
            "-o".into(),
            zone.into(),
            "-n".into(),
            "-s".into(),
            salt.clone().into(),
            "-t".into(),
            iterations.to_string().into(),
            "-a".into(),
            algorithm.to_string().into(),
        ]);
    }
    let mut sorter = ToolProcess::spawn(SORTER, config.tool_path(SORTER), args, Stdio::piped())?;

    if let Err(err) = feed_sorter(config, policy, zone, paths, &mut sorter) {
        let cmdline = sorter.command_line().to_string();
        error!("error sorting zone {zone}");
        error!("command was: {cmdline}");
        let _ = sorter.wait();
        return Err(err.context(&format!("sorting zone {zone} (command was: {cmdline})")));
    }
    sorter.wait_success()?;
    info!("done sorting");
    Ok(())
}

/// Stream the sorter's input and capture its output.
fn feed_sorter(
    config: &EngineConfig,
    policy: &mut ZonePolicy,
    zone: &str,
    paths: &ZonePaths,
    sorter: &mut ToolProcess,
) -> Result<()> {
    let input = File::open(&paths.input).map_err(|e| {
        format!(
            "unable to open input zone file {}: {e}",
            paths.input.display()
        )
    })?;
    let mut stdin = BufWriter::new(sorter.stdin()?);

    // Published keys go in front of the zone data.
    let resolver = KeyResolver::new(config);
    for key in &mut policy.publish_keys {
        if key.resolved.is_none() {
            debug!("no information yet for key {}", key.locator);
            resolver.resolve(key, zone);
        }
        match &key.resolved {
            Some(found) => writeln!(stdin, "{}", found.dnskey_rr)?,
            None => {
                error!("could not find key {}", key.locator);
                writeln!(stdin, "; Unable to find key {}", key.locator)?;
            }
        }
    }

    // Then the unsigned zone, byte for byte.
    let mut reader = BufReader::new(input);
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).map_err(|e| {
            format!(
                "unable to read input zone file {}: {e}",
                paths.input.display()
            )
        })?;
        if n == 0 {
            break;
        }
        stdin.write_all(&line)?;
    }
    stdin.flush()?;
    drop(stdin);

    let mut sorted = File::create(&paths.sorted).map_err(|e| {
        format!(
            "unable to create sorted zone file {}: {e}",
            paths.sorted.display()
        )
    })?;
    io::copy(&mut sorter.stdout()?, &mut sorted)
        .map_err(|e| format!("unable to read sorter output: {e}"))?;
    Ok(())
}

//============ Tests =========================================================
