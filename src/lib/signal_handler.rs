//! Signal handling for the entrypoint process itself
//!
//! SIGINT and SIGTERM sent to the entrypoint do not kill it outright. They raise
//! an abort flag, and the supervisor forwards the interruption to the child's
//! process group and escalates like a timeout would.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static ABORT_REQUESTED: AtomicBool = AtomicBool::new(false);
static RECEIVED_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Check if an abort has been requested
pub fn abort_requested() -> bool {
    ABORT_REQUESTED.load(Ordering::SeqCst)
}

/// The last signal that requested an abort, if any
pub fn received_signal() -> Option<i32> {
    match RECEIVED_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        signal => Some(signal),
    }
}

/// Install the abort handlers and return the flag they raise.
#[cfg(unix)]
pub fn install_abort_handlers() -> &'static AtomicBool {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| unsafe {
        libc::signal(libc::SIGINT, record_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, record_signal as *const () as libc::sighandler_t);
    });
    &ABORT_REQUESTED
}

#[cfg(not(unix))]
pub fn install_abort_handlers() -> &'static AtomicBool {
    // Signal handling not supported on non-Unix platforms
    &ABORT_REQUESTED
}

/// Only touches atomics, so it is async-signal-safe.
#[cfg(unix)]
extern "C" fn record_signal(sig: libc::c_int) {
    RECEIVED_SIGNAL.store(sig, Ordering::SeqCst);
    ABORT_REQUESTED.store(true, Ordering::SeqCst);
}
