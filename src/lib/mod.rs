//! entrypoint library
//!
//! Supervises a single CI step command: enforces a timeout with SIGINT/SIGKILL
//! escalation, optionally waits on a previous step's marker file, and publishes
//! the result code to this step's marker.

pub mod args_parser;
pub mod copy_mode;
pub mod error;
pub mod logging;
pub mod marker;
pub mod options;
pub mod publisher;
pub mod runner;
pub mod signal_handler;
pub mod supervisor;

// Re-export commonly used items
pub use args_parser::{parse_duration, Cli};
pub use copy_mode::{copy_binary, run_copy_mode};
pub use error::{EntrypointError, Result};
pub use logging::init_tracing;
pub use marker::{gate, read_marker, wait_for_marker, write_marker, GateDecision, PollSettings};
pub use options::{encode, Options, WrapperOptions, DEFAULT_COPY_DST, JSON_CONFIG_ENV_VAR};
pub use publisher::{
    publish, result_code, Publication, ResultPublisher, ABORTED_CODE, INTERNAL_ERROR_CODE,
    TIMED_OUT_CODE,
};
pub use runner::{error_exit_code, run, ARTIFACTS_ENV_VAR};
pub use signal_handler::{abort_requested, install_abort_handlers, received_signal};
pub use supervisor::{Outcome, Supervisor};
