//! entrypoint CLI
//!
//! Wraps one CI step command:
//! - Interrupts it after --timeout and kills it after --grace-period
//! - Waits for a previous step's marker and skips the command if that step failed
//! - Writes the result code to --marker-file for later steps
//!
//! When ENTRYPOINT_OPTIONS is set it holds the full JSON configuration and
//! command-line flags are not read.

use std::process;

use clap::Parser;
use tracing::{error, info, Level};

use entrypoint::{
    error_exit_code, init_tracing, install_abort_handlers, received_signal, run, Cli, Options,
    PollSettings, JSON_CONFIG_ENV_VAR,
};

/// Logging preferences plus the options to run with
struct Invocation {
    options: Options,
    log_json: bool,
    verbose: bool,
}

fn load_invocation() -> Invocation {
    match Options::from_env() {
        Ok(Some(options)) => Invocation {
            options,
            log_json: false,
            verbose: false,
        },
        Ok(None) => {
            let cli = Cli::parse();
            let (log_json, verbose) = (cli.log_json, cli.verbose);
            Invocation {
                options: cli.into_options(),
                log_json,
                verbose,
            }
        }
        Err(e) => {
            eprintln!("Error: could not load {}: {}", JSON_CONFIG_ENV_VAR, e);
            process::exit(1);
        }
    }
}

fn main() {
    let invocation = load_invocation();
    let level = if invocation.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(invocation.log_json, level);

    let abort = install_abort_handlers();
    let result = run(&invocation.options, &PollSettings::default(), Some(abort));
    if let Some(signal) = received_signal() {
        info!(signal, "entrypoint was asked to stop");
    }
    match result {
        Ok(exit_status) => process::exit(exit_status),
        Err(e) => {
            error!(error = %e, "entrypoint failed");
            process::exit(error_exit_code(&e));
        }
    }
}
