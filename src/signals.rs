//! Signal disposition
//!
//! SIGTERM and SIGINT set a process-global flag; the handlers are installed
//! without `SA_RESTART` so a worker blocked in `accept` is interrupted with
//! `EINTR` and re-checks the flag. Workers inherit the disposition across
//! fork. SIGCHLD keeps its default disposition (ignored, children stay
//! reapable); the master reaps opportunistically with `waitpid`.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Installs the termination handlers. Called once in the master, before
/// fork, so every worker inherits them.
pub fn install() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_shutdown),
        SaFlags::empty(),
        SigSet::empty(),
    );

    // SAFETY: the handler only touches a static AtomicBool, which is
    // async-signal-safe.
    unsafe {
        signal::sigaction(Signal::SIGTERM, &action)?;
        signal::sigaction(Signal::SIGINT, &action)?;
    }

    Ok(())
}

/// Whether a termination signal has been received.
#[inline]
pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Raises the shutdown flag directly, as the signal handler would. Used by
/// the integration tests to drain an in-process worker.
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}
