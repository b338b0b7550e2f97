//! Signal shim mapping process signals onto the session's shared flags.
//!
//! SIGINT and SIGTERM request a clean stop; SIGUSR1 requests an inventory
//! dump to stderr. Handlers only set atomics, so the session observes them
//! at its next loop boundary.

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[cfg(unix)]
pub fn install(stop: &Arc<AtomicBool>, dump: &Arc<AtomicBool>) -> io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};

    signal_hook::flag::register(SIGINT, Arc::clone(stop))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(stop))?;
    signal_hook::flag::register(SIGUSR1, Arc::clone(dump))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn install(_stop: &Arc<AtomicBool>, _dump: &Arc<AtomicBool>) -> io::Result<()> {
    Ok(())
}
