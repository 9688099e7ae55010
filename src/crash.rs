//! Crash safety (§4.C16): fault-signal handlers and the invalid-free/fatal
//! reporting paths that the interposer and tracker fall back to when an
//! invariant is violated.
//!
//! Grounded on `crashWarner/crashWarner.cpp` and `signals.cpp`: a handler
//! installed for the signals a corrupted heap or a bad pointer typically
//! raises, which toggles the calling thread's reentrancy flag before doing
//! anything else, prints what it can, then restores the platform's default
//! disposition and re-raises so the process terminates the way it would have
//! without this crate loaded (core dump, correct exit status, etc.).

use std::os::raw::c_int;
use std::sync::Once;

use crate::tracker::thread_tracker;

const FAULT_SIGNALS: &[c_int] = &[libc::SIGSEGV, libc::SIGBUS, libc::SIGILL, libc::SIGFPE, libc::SIGABRT];

extern "C" fn handle_fault(sig: c_int) {
    // Toggle first: whatever this handler does next — formatting a
    // message, walking the stack — must not be mistaken for a leak of its
    // own making.
    thread_tracker::with_current(|tracker| tracker.set_ignoring(true));

    let name = signal_name(sig);
    eprintln!("\nfatal signal {name} ({sig}) — a tracked allocation's bookkeeping may be corrupt");
    let trace = crate::callstack::CallStack::capture(32);
    eprint!("{}", trace.format("  "));

    unsafe {
        let mut default_action: libc::sigaction = std::mem::zeroed();
        default_action.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut default_action.sa_mask);
        libc::sigaction(sig, &default_action, std::ptr::null_mut());
        libc::raise(sig);
    }
}

fn signal_name(sig: c_int) -> &'static str {
    match sig {
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGBUS => "SIGBUS",
        libc::SIGILL => "SIGILL",
        libc::SIGFPE => "SIGFPE",
        libc::SIGABRT => "SIGABRT",
        _ => "unknown",
    }
}

static INSTALL: Once = Once::new();

/// Installs the fault-signal handlers, idempotently. Safe to call from
/// every entry point that might run before process startup has finished.
pub fn install() {
    INSTALL.call_once(|| unsafe {
        for &sig in FAULT_SIGNALS {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_fault as usize;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = 0;
            if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
                tracing::error!(signal = sig, "failed to install fault handler");
            }
        }
    });
}

/// Reports an invalid or double free at `pointer`, warning or aborting per
/// [`crate::config::Config::invalid_free_crash`] — `handle_invalid_free`'s own
/// `tracing::warn!`/`tracing::error!` already logged which case this is, so
/// this function only decides whether to terminate.
pub fn report_invalid_free(pointer: usize, is_double_free: bool) {
    let config = crate::config::global();
    if config.invalid_free_crash {
        fatal(&format!(
            "{} at {pointer:#x}",
            if is_double_free { "double free" } else { "invalid free" }
        ));
    }
}

/// Logs `message` at `error` level and aborts the process — the Rust
/// analogue of the original's `crashWarner::crash`, used for internal
/// invariant violations that have no recoverable error type (§7).
pub fn fatal(message: &str) -> ! {
    tracing::error!("{message}");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_name_covers_every_registered_fault() {
        for &sig in FAULT_SIGNALS {
            assert_ne!(signal_name(sig), "unknown");
        }
    }
}
