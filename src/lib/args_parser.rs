//! Command-line surface for the entrypoint
//!
//! Supports two syntax patterns:
//! 1. $ entrypoint [options] -- <command> [args...]
//! 2. $ entrypoint [options] <command> [args...]
//!
//! Options:
//! --timeout <duration>             Interrupt the command after this long (0 disables)
//! --grace-period <duration>        Kill the command this long after interrupting it
//! --artifact-dir <dir>             Directory for the command's artifacts
//! --previous-marker <file>         Wait for a prior step's marker before running
//! --marker-file <file>             Where to publish this step's result code
//! --metadata-file <file>           Optional JSON summary of the run
//! --always-zero                    Exit zero whatever the result code
//! --propagate-error-code           Exit with the command's result code
//! --copy-mode-only                 Install this binary and exit
//! --copy-destination <file>        Where copy mode installs the binary

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use clap::Parser;
use regex::Regex;

use crate::options::{Options, WrapperOptions, DEFAULT_COPY_DST};

/// Default `--timeout` when given on the command line.
pub const DEFAULT_TIMEOUT: &str = "2h";

/// Default `--grace-period` when given on the command line.
pub const DEFAULT_GRACE_PERIOD: &str = "15s";

#[derive(Debug, Parser)]
#[command(name = "entrypoint")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Supervise a CI step command and publish its result", long_about = None)]
pub struct Cli {
    /// Timeout for the wrapped command
    #[arg(long, value_parser = parse_duration, default_value = DEFAULT_TIMEOUT)]
    pub timeout: Duration,

    /// Grace period after timeout for the wrapped command
    #[arg(long, value_parser = parse_duration, default_value = DEFAULT_GRACE_PERIOD)]
    pub grace_period: Duration,

    /// Directory where the command should place artifacts for upload
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    /// Marker file of a previous step to wait on
    #[arg(long)]
    pub previous_marker: Option<PathBuf>,

    /// File to write the result code to
    #[arg(long)]
    pub marker_file: Option<PathBuf>,

    /// File to write a JSON run summary to
    #[arg(long)]
    pub metadata_file: Option<PathBuf>,

    /// Exit zero regardless of the result code written to the marker
    #[arg(long)]
    pub always_zero: bool,

    /// Exit with the result code of the wrapped command
    #[arg(long)]
    pub propagate_error_code: bool,

    /// Copy the current binary to --copy-destination and exit
    #[arg(long)]
    pub copy_mode_only: bool,

    /// Destination for --copy-mode-only
    #[arg(long = "copy-destination", default_value = DEFAULT_COPY_DST)]
    pub copy_dst: PathBuf,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    pub log_json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to wrap, followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Internalize flags and trailing arguments into [`Options`].
    pub fn into_options(self) -> Options {
        Options {
            timeout: self.timeout,
            grace_period: self.grace_period,
            artifact_dir: self.artifact_dir,
            previous_marker: self.previous_marker,
            always_zero: self.always_zero,
            propagate_error_code: self.propagate_error_code,
            copy_mode_only: self.copy_mode_only,
            copy_dst: self.copy_dst,
            wrapper: WrapperOptions {
                args: self.args,
                marker_file: self.marker_file.unwrap_or_default(),
                metadata_file: self.metadata_file,
            },
        }
    }
}

/// Parse a duration such as `"300ms"`, `"2h45m"` or `"1.5h"`.
///
/// A bare `"0"` means zero. Everything else goes through [`humantime`], except
/// a single fractional component which humantime does not accept.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if let Some(caps) = fractional_component().captures(text) {
        let unit =
            humantime::parse_duration(&format!("1{}", &caps[3])).map_err(|e| e.to_string())?;
        let whole: u32 = caps[1]
            .parse()
            .map_err(|_| format!("duration \"{}\" is too large", input))?;
        let fraction: f64 = format!("0.{}", &caps[2])
            .parse()
            .map_err(|_| format!("invalid number in duration \"{}\"", input))?;
        return unit
            .checked_mul(whole)
            .and_then(|d| d.checked_add(unit.mul_f64(fraction)))
            .ok_or_else(|| format!("duration \"{}\" is too large", input));
    }
    humantime::parse_duration(text).map_err(|e| format!("invalid duration \"{}\": {}", input, e))
}

/// `<whole>.<fraction><unit>`, as in `1.5h` or `0.25s`
fn fractional_component() -> &'static Regex {
    static FRACTIONAL: OnceLock<Regex> = OnceLock::new();
    FRACTIONAL.get_or_init(|| {
        Regex::new(r"^(\d+)\.(\d+)(ns|us|ms|h|m|s)$")
            .expect("fractional duration pattern is valid")
    })
}
