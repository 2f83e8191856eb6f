//! Entrypoint options
//!
//! The full configuration of one supervised step. It is either decoded from the
//! JSON held in [`JSON_CONFIG_ENV_VAR`] or assembled from CLI flags (see
//! [`crate::args_parser`]), and is read-only once [`Options::validate`] passes.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EntrypointError, Result};

/// Environment variable holding the full JSON configuration.
pub const JSON_CONFIG_ENV_VAR: &str = "ENTRYPOINT_OPTIONS";

/// Where copy mode installs the binary unless told otherwise.
pub const DEFAULT_COPY_DST: &str = "/tools/entrypoint";

/// Process-level options shared with the other pod utilities: what to run and
/// where to record how it ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapperOptions {
    /// Command and its arguments
    pub args: Vec<String>,
    /// Marker this invocation publishes its result code to
    pub marker_file: PathBuf,
    /// Optional JSON summary written next to the marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_file: Option<PathBuf>,
}

impl WrapperOptions {
    pub fn validate(&self) -> Result<()> {
        if self.args.is_empty() {
            return Err(EntrypointError::config("no process to wrap specified"));
        }
        if self.marker_file.as_os_str().is_empty() {
            return Err(EntrypointError::config("no marker file specified"));
        }
        Ok(())
    }
}

/// Configuration for one supervised run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// How long the child may run before it is interrupted; zero disables the limit
    #[serde(with = "duration_nanos")]
    pub timeout: Duration,
    /// How long an interrupted child gets before it is killed; zero waits forever
    #[serde(with = "duration_nanos")]
    pub grace_period: Duration,
    /// Directory the child may dump artifacts into; created before the child starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    /// Marker of a prior step that gates this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_marker: Option<PathBuf>,
    /// Exit zero no matter what the marker says
    #[serde(skip_serializing_if = "is_false")]
    pub always_zero: bool,
    /// Exit with the child's result code
    #[serde(skip_serializing_if = "is_false")]
    pub propagate_error_code: bool,
    /// Install this binary at `copy_dst` and do nothing else
    #[serde(skip_serializing_if = "is_false")]
    pub copy_mode_only: bool,
    pub copy_dst: PathBuf,
    #[serde(flatten)]
    pub wrapper: WrapperOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            grace_period: Duration::ZERO,
            artifact_dir: None,
            previous_marker: None,
            always_zero: false,
            propagate_error_code: false,
            copy_mode_only: false,
            copy_dst: PathBuf::from(DEFAULT_COPY_DST),
            wrapper: WrapperOptions::default(),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Options {
    /// Command and arguments of the wrapped process.
    pub fn args(&self) -> &[String] {
        &self.wrapper.args
    }

    /// Ensure the options are self-consistent.
    ///
    /// Copy mode ignores `args` and never writes a marker, so the embedded
    /// wrapper validation only runs for supervised invocations.
    pub fn validate(&self) -> Result<()> {
        if self.propagate_error_code && self.always_zero {
            return Err(EntrypointError::config(
                "cannot propagate error code and always exit zero",
            ));
        }
        if self.copy_mode_only {
            return Ok(());
        }
        if self.wrapper.args.is_empty() {
            return Err(EntrypointError::config("no process to wrap specified"));
        }
        self.wrapper.validate()
    }

    /// Decode options from the serialized configuration.
    pub fn load_config(config: &str) -> Result<Self> {
        Ok(serde_json::from_str(config)?)
    }

    /// Load options from [`JSON_CONFIG_ENV_VAR`], if it is set.
    pub fn from_env() -> Result<Option<Self>> {
        match env::var(JSON_CONFIG_ENV_VAR) {
            Ok(config) => Self::load_config(&config).map(Some),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => Err(EntrypointError::config(format!(
                "{} is not valid UTF-8",
                JSON_CONFIG_ENV_VAR
            ))),
        }
    }
}

/// Encode options in the form expected by [`JSON_CONFIG_ENV_VAR`].
pub fn encode(options: &Options) -> Result<String> {
    Ok(serde_json::to_string(options)?)
}

/// Durations travel as integer nanoseconds. Duration strings such as `"1h30m"`
/// are accepted on input as well.
mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::args_parser::parse_duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Nanos(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
            Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}
