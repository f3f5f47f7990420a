//! Signal handling for the daemon's startup sequence (C6 step 2).
//!
//! Fatal signals are logged and exit the process non-zero. Clean-shutdown
//! signals request the same graceful sequence as a bus `STOP`. Console-job
//! control signals are ignored outright so backgrounding the daemon from
//! an interactive shell does not suspend it.

use dbproxy_core::error::ProxyResult;
use log::error;
use signal_hook::consts::{SIGBUS, SIGFPE, SIGILL, SIGINT, SIGQUIT, SIGSEGV, SIGTERM, SIGTSTP, SIGTTIN, SIGTTOU};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const FATAL: [i32; 4] = [SIGSEGV, SIGBUS, SIGFPE, SIGILL];
const CLEAN: [i32; 3] = [SIGTERM, SIGINT, SIGQUIT];
const IGNORED: [i32; 3] = [SIGTSTP, SIGTTIN, SIGTTOU];

/// Spawns a background thread that watches for fatal and clean-shutdown
/// signals. `shutdown_requested` is flipped for SIGTERM/SIGINT/SIGQUIT so
/// the event loop can notice it between iterations; everything else in
/// `FATAL` logs and calls `process::exit(1)` directly, matching the
/// original daemon's sighandler which never returns.
pub fn install(shutdown_requested: Arc<AtomicBool>) -> ProxyResult<()> {
    for sig in IGNORED {
        // SAFETY: SIG_IGN via signal-hook's flag API rather than raw libc,
        // consistent with the rest of this module.
        unsafe {
            signal_hook::low_level::register(sig, || {})?;
        }
    }

    let mut watched: Vec<i32> = FATAL.iter().chain(CLEAN.iter()).copied().collect();
    watched.sort_unstable();
    watched.dedup();

    let mut signals = Signals::new(watched)?;
    std::thread::spawn(move || {
        for sig in signals.forever() {
            if CLEAN.contains(&sig) {
                error!("received signal {sig}, requesting graceful shutdown");
                shutdown_requested.store(true, Ordering::SeqCst);
                continue;
            }
            error!("received fatal signal {sig}, terminating");
            std::process::exit(1);
        }
    });
    Ok(())
}
