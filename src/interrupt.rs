//! Process-wide interrupt flag set by SIGINT/SIGTERM.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// The flag workers check before starting a unit.
pub fn flag() -> &'static AtomicBool {
    &INTERRUPTED
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Install the signal handlers. Returns false if they could not be installed
/// (or the platform has none), in which case Ctrl-C terminates immediately.
#[cfg(unix)]
pub fn install() -> bool {
    extern "C" fn on_signal(signum: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
        // A second signal gets the default action
        // SAFETY: signal(2) is async-signal-safe.
        unsafe {
            libc::signal(signum, libc::SIG_DFL);
        }
    }

    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    [libc::SIGINT, libc::SIGTERM].iter().all(|&sig| {
        // SAFETY: the handler only performs an atomic store and re-arms the default.
        let previous = unsafe { libc::signal(sig, handler) };
        previous != libc::SIG_ERR
    })
}

#[cfg(not(unix))]
pub fn install() -> bool {
    log::debug!("No interrupt handler on this platform");
    false
}
