//! SOA serial policies.
//!
//! The serial written to the signed zone is decided once per run, from the
//! serials observed when the run starts. Prior serials come out of the
//! external `get_serial` tool; a failure to obtain one is never fatal, it
//! simply means "no serial".

use std::path::Path;
use std::process::{Command, Stdio};

use chrono::{DateTime, Datelike, Utc};
use tracing::{debug, warn};

use crate::policy::SerialMode;

//------------ compute -------------------------------------------------------

/// Compute the serial to emit, or `None` to keep the upstream serial.
///
/// Pure in its arguments; `now` is supplied by the caller.
pub fn compute(
    mode: &SerialMode,
    prior_output: Option<u32>,
    prior_input: Option<u32>,
    now: DateTime<Utc>,
) -> Option<u32> {
    match mode {
        SerialMode::Keep => None,
        SerialMode::Unixtime => Some(now.timestamp() as u32),
        SerialMode::Counter => {
            // The previously emitted serial wins over the input serial;
            // zero counts as absent in both.
            let prior = prior_output
                .filter(|&s| s != 0)
                .or(prior_input.filter(|&s| s != 0))
                .unwrap_or(0);
            Some(prior.wrapping_add(1))
        }
        SerialMode::Datecounter => {
            let base =
                (now.year() as u32 * 10000 + now.month() * 100 + now.day()).wrapping_mul(100);
            Some(match prior_output {
                Some(prior) if prior >= base => prior.wrapping_add(1),
                _ => base,
            })
        }
        SerialMode::Unknown(mode) => {
            warn!("unknown serial mode {mode}, keeping upstream serial");
            None
        }
    }
}

//------------ extract -------------------------------------------------------

/// Read the SOA serial of `zone_file` via the external serial extractor.
///
/// A nonzero exit, an unreadable file or unusable output all yield `None`
/// with a warning; the caller treats the serial as absent.
pub fn extract(tool: &Path, zone_file: &Path) -> Option<u32> {
    let output = match Command::new(tool)
        .arg("-f")
        .arg(zone_file)
        .stdin(Stdio::null())
        .output()
    {
        Ok(output) => output,
        Err(err) => {
            warn!("unable to run {}: {err}", tool.display());
            return None;
        }
    };

    if !output.status.success() {
        warn!(
            "get_serial returned {} for {}",
            output.status,
            zone_file.display()
        );
        return None;
    }

    // The last line of output wins.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let serial = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.trim().parse().ok());
    match serial {
        Some(serial) => {
            debug!("{} has serial {serial}", zone_file.display());
            Some(serial)
        }
        None => {
            warn!("get_serial produced no serial for {}", zone_file.display());
            None
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn keep_mode_never_overrides() {
        assert_eq!(
            compute(&SerialMode::Keep, Some(7), Some(7), at(2024, 5, 1)),
            None
        );
    }

    #[test]
    fn unixtime_is_now() {
        let now = at(2024, 5, 1);
        assert_eq!(
            compute(&SerialMode::Unixtime, None, None, now),
            Some(now.timestamp() as u32)
        );
    }

    #[test]
    fn counter_increments_prior_output() {
        assert_eq!(
            compute(
                &SerialMode::Counter,
                Some(2000010100),
                Some(0),
                at(2024, 5, 1)
            ),
            Some(2000010101)
        );
    }

    #[test]
    fn counter_falls_back_to_input_serial() {
        assert_eq!(
            compute(&SerialMode::Counter, Some(0), Some(41), at(2024, 5, 1)),
            Some(42)
        );
        assert_eq!(
            compute(&SerialMode::Counter, None, Some(41), at(2024, 5, 1)),
            Some(42)
        );
    }

    #[test]
    fn counter_starts_at_one_without_priors() {
        assert_eq!(
            compute(&SerialMode::Counter, None, None, at(2024, 5, 1)),
            Some(1)
        );
    }

    #[test]
    fn datecounter_starts_at_base() {
        assert_eq!(
            compute(
                &SerialMode::Datecounter,
                Some(2024050050),
                None,
                at(2024, 5, 1)
            ),
            Some(2024050100)
        );
        assert_eq!(
            compute(&SerialMode::Datecounter, None, None, at(2024, 5, 1)),
            Some(2024050100)
        );
    }

    #[test]
    fn datecounter_increments_past_base() {
        assert_eq!(
            compute(
                &SerialMode::Datecounter,
                Some(2024050150),
                None,
                at(2024, 5, 1)
            ),
            Some(2024050151)
        );
    }

    #[test]
    fn unknown_mode_keeps_upstream_serial() {
        let mode = SerialMode::Unknown("lunartime".to_string());
        assert_eq!(compute(&mode, Some(5), Some(5), at(2024, 5, 1)), None);
    }

    fn stub_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("get_serial");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn extract_reads_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let tool = stub_tool(dir.path(), "echo ignored\necho 2000010100");
        assert_eq!(
            extract(&tool, Path::new("whatever.zone")),
            Some(2000010100)
        );
    }

    #[test]
    fn extract_treats_nonzero_exit_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let tool = stub_tool(dir.path(), "exit 1");
        assert_eq!(extract(&tool, Path::new("whatever.zone")), None);
    }

    #[test]
    fn extract_treats_missing_tool_as_absent() {
        assert_eq!(
            extract(Path::new("/nonexistent/get_serial"), Path::new("x")),
            None
        );
    }

    #[test]
    fn extract_treats_garbage_output_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let tool = stub_tool(dir.path(), "echo not-a-serial");
        assert_eq!(extract(&tool, Path::new("whatever.zone")), None);
    }
}
