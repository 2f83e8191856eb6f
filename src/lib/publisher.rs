//! Result publishing
//!
//! Turns an [`Outcome`] into the code written to this step's marker and the
//! entrypoint's own exit status. The marker always carries the true result
//! code; `always_zero` only changes the exit status.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::marker;
use crate::options::Options;
use crate::supervisor::Outcome;

/// Reported when the wrapper could not run the command at all.
pub const INTERNAL_ERROR_CODE: i32 = 127;

/// Reported when the command had to be killed after its timeout.
pub const TIMED_OUT_CODE: i32 = 124;

/// Reported when the entrypoint itself was interrupted.
pub const ABORTED_CODE: i32 = 130;

/// The two values derived from an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publication {
    /// Exit status of the entrypoint process
    pub exit_status: i32,
    /// Code written to the marker file
    pub marker_code: i32,
}

/// The true result code of an outcome.
pub fn result_code(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Exited(code) | Outcome::SkippedDueToPriorFailure(code) => *code,
        Outcome::TimedOutKilled => TIMED_OUT_CODE,
        Outcome::SpawnFailed(_) => INTERNAL_ERROR_CODE,
        Outcome::Aborted => ABORTED_CODE,
    }
}

/// Map an outcome to its marker code and exit status.
pub fn publish(outcome: &Outcome, always_zero: bool, propagate_error_code: bool) -> Publication {
    let marker_code = result_code(outcome);
    debug_assert!(
        !(always_zero && propagate_error_code),
        "exit policies are mutually exclusive"
    );
    // propagating and the default policy both mirror the result code
    let exit_status = if always_zero { 0 } else { marker_code };
    Publication {
        exit_status,
        marker_code,
    }
}

#[derive(Serialize)]
struct RunMetadata<'a> {
    outcome: &'a str,
    code: i32,
    timed_out: bool,
}

/// Writes this step's marker (and metadata, if configured).
#[derive(Debug, Clone)]
pub struct ResultPublisher {
    marker_file: PathBuf,
    metadata_file: Option<PathBuf>,
    always_zero: bool,
    propagate_error_code: bool,
}

impl ResultPublisher {
    pub fn new(options: &Options) -> Self {
        Self {
            marker_file: options.wrapper.marker_file.clone(),
            metadata_file: options.wrapper.metadata_file.clone(),
            always_zero: options.always_zero,
            propagate_error_code: options.propagate_error_code,
        }
    }

    /// Write the marker for `outcome` and return the exit status to use.
    pub fn publish(&self, outcome: &Outcome) -> Result<i32> {
        let publication = publish(outcome, self.always_zero, self.propagate_error_code);
        marker::write_marker(&self.marker_file, publication.marker_code)?;
        info!(
            path = %self.marker_file.display(),
            code = publication.marker_code,
            exit_status = publication.exit_status,
            outcome = outcome.kind(),
            "published result"
        );
        self.write_metadata(outcome, publication.marker_code);
        Ok(publication.exit_status)
    }

    /// Record an infrastructure failure so dependent steps do not wait forever.
    pub fn publish_internal_error(&self) -> Result<()> {
        marker::write_marker(&self.marker_file, INTERNAL_ERROR_CODE)
    }

    fn write_metadata(&self, outcome: &Outcome, code: i32) {
        let Some(path) = &self.metadata_file else {
            return;
        };
        let metadata = RunMetadata {
            outcome: outcome.kind(),
            code,
            timed_out: *outcome == Outcome::TimedOutKilled,
        };
        let written = serde_json::to_vec_pretty(&metadata)
            .map_err(std::io::Error::from)
            .and_then(|bytes| marker::write_atomic(path, &bytes));
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "could not write metadata file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::WrapperOptions;
    use tempfile::TempDir;

    #[test]
    fn test_exited_mapping() {
        let outcome = Outcome::Exited(3);
        assert_eq!(
            publish(&outcome, false, false),
            Publication { exit_status: 3, marker_code: 3 }
        );
        assert_eq!(
            publish(&outcome, true, false),
            Publication { exit_status: 0, marker_code: 3 }
        );
        assert_eq!(
            publish(&outcome, false, true),
            Publication { exit_status: 3, marker_code: 3 }
        );
    }

    #[test]
    fn test_propagate_and_default_policies_agree() {
        for outcome in [
            Outcome::Exited(0),
            Outcome::Exited(42),
            Outcome::TimedOutKilled,
            Outcome::SpawnFailed("x".into()),
            Outcome::SkippedDueToPriorFailure(9),
            Outcome::Aborted,
        ] {
            assert_eq!(publish(&outcome, false, true), publish(&outcome, false, false));
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "mutually exclusive")]
    fn test_conflicting_policies_are_a_bug() {
        publish(&Outcome::Exited(1), true, true);
    }

    #[test]
    fn test_skipped_carries_code_forward() {
        let outcome = Outcome::SkippedDueToPriorFailure(17);
        assert_eq!(publish(&outcome, false, false).marker_code, 17);
        assert_eq!(publish(&outcome, false, false).exit_status, 17);
        assert_eq!(publish(&outcome, true, false).exit_status, 0);
        assert_eq!(publish(&outcome, true, false).marker_code, 17);
    }

    #[test]
    fn test_distinguished_codes() {
        assert_eq!(result_code(&Outcome::TimedOutKilled), TIMED_OUT_CODE);
        assert_eq!(result_code(&Outcome::SpawnFailed("x".into())), INTERNAL_ERROR_CODE);
        assert_eq!(result_code(&Outcome::Aborted), ABORTED_CODE);
        assert_ne!(TIMED_OUT_CODE, 0);
        assert_ne!(INTERNAL_ERROR_CODE, 0);
    }

    #[test]
    fn test_timeout_marker_ignores_always_zero() {
        let publication = publish(&Outcome::TimedOutKilled, true, false);
        assert_eq!(publication.exit_status, 0);
        assert_eq!(publication.marker_code, TIMED_OUT_CODE);
    }

    #[test]
    fn test_publisher_writes_marker_and_metadata() {
        let dir = TempDir::new().unwrap();
        let options = Options {
            always_zero: true,
            wrapper: WrapperOptions {
                args: vec!["true".to_string()],
                marker_file: dir.path().join("marker"),
                metadata_file: Some(dir.path().join("metadata.json")),
            },
            ..Options::default()
        };

        let exit_status = ResultPublisher::new(&options)
            .publish(&Outcome::TimedOutKilled)
            .unwrap();
        assert_eq!(exit_status, 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("marker")).unwrap(),
            TIMED_OUT_CODE.to_string()
        );

        let metadata: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("metadata.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(metadata["outcome"], "timed_out");
        assert_eq!(metadata["code"], TIMED_OUT_CODE);
        assert_eq!(metadata["timed_out"], true);
    }

    #[test]
    fn test_publish_to_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let options = Options {
            wrapper: WrapperOptions {
                args: vec!["true".to_string()],
                marker_file: dir.path().join("missing").join("marker"),
                metadata_file: None,
            },
            ..Options::default()
        };
        assert!(ResultPublisher::new(&options).publish(&Outcome::Exited(0)).is_err());
    }
}
