//! One entrypoint invocation, end to end
//!
//! validate → (copy mode) → wait on the previous marker → supervise → publish.

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;

use tracing::{error, info};

use crate::copy_mode::run_copy_mode;
use crate::error::{EntrypointError, Result};
use crate::marker::{self, GateDecision, PollSettings};
use crate::options::Options;
use crate::publisher::{ResultPublisher, INTERNAL_ERROR_CODE};
use crate::supervisor::{Outcome, Supervisor};

/// Environment variable pointing the child at its artifact directory.
pub const ARTIFACTS_ENV_VAR: &str = "ARTIFACTS";

/// Run the configured step and return the entrypoint's exit status.
///
/// Errors are the wrapper's own failures. When one happens after the marker
/// gate has been reached, [`INTERNAL_ERROR_CODE`] is still written to the
/// marker so later steps are not left waiting.
pub fn run(options: &Options, poll: &PollSettings, abort: Option<&AtomicBool>) -> Result<i32> {
    options.validate()?;

    if options.copy_mode_only {
        run_copy_mode(&options.copy_dst)?;
        return Ok(0);
    }

    let publisher = ResultPublisher::new(options);
    let outcome = match decide(options, poll, abort) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "entrypoint failed before the result was known");
            if let Err(write_err) = publisher.publish_internal_error() {
                error!(error = %write_err, "could not record internal error in marker");
            }
            return Err(e);
        }
    };
    publisher.publish(&outcome)
}

/// Consult the previous marker and, if allowed, supervise the command.
fn decide(options: &Options, poll: &PollSettings, abort: Option<&AtomicBool>) -> Result<Outcome> {
    match marker::gate(options.previous_marker.as_deref(), poll, abort) {
        Ok(GateDecision::Proceed) => {}
        Ok(GateDecision::SkipWithCode(code)) => {
            return Ok(Outcome::SkippedDueToPriorFailure(code));
        }
        Err(EntrypointError::Interrupted) => {
            info!("interrupted while waiting for previous step");
            return Ok(Outcome::Aborted);
        }
        Err(e) => return Err(e),
    }

    let mut supervisor = Supervisor::new(options.timeout, options.grace_period);
    if let Some(flag) = abort {
        supervisor = supervisor.abort_on(flag);
    }
    if let Some(dir) = &options.artifact_dir {
        if let Err(e) = prepare_artifact_dir(dir) {
            error!(error = %e, "not starting process");
            return Ok(Outcome::SpawnFailed(e.to_string()));
        }
        supervisor = supervisor.env(ARTIFACTS_ENV_VAR, dir.as_os_str());
    }

    supervisor.supervise(options.args())
}

fn prepare_artifact_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| EntrypointError::ArtifactDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Exit status for an error that escaped [`run`].
pub fn error_exit_code(error: &EntrypointError) -> i32 {
    match error {
        EntrypointError::MarkerRead { .. }
        | EntrypointError::MarkerTimeout { .. }
        | EntrypointError::Wait(_) => INTERNAL_ERROR_CODE,
        _ => 1,
    }
}
