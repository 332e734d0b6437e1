//! SIGINT handling for the capture loop.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::{
    libc::c_int,
    sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
};
use tracing::warn;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route Ctrl-C into a flag instead of killing the process. A second Ctrl-C
/// after the flag is set still terminates immediately.
///
/// Blocking calls that the signal lands in are restarted, so a capture or a
/// serial read in progress finishes and the loop stops at its next check.
pub fn install_interrupt_handler() {
    INTERRUPTED.store(false, Ordering::SeqCst);
    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESTART | SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    // on_sigint only touches an atomic
    if let Err(e) = unsafe { sigaction(Signal::SIGINT, &action) } {
        warn!("could not install the Ctrl-C handler: {e}");
    }
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
