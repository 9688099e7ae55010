//! Linux stop-the-world coordination (§4.C8).
//!
//! There is no native thread-suspend syscall on Linux, so the original
//! (`LSan::suspendThreads`) signals every other thread with a real-time
//! signal whose handler spins on a shared flag until the scan finishes. This
//! is a best-effort handshake, not a synchronous barrier: `pthread_kill`
//! succeeding only means the signal was *delivered*, not that the target has
//! actually entered the handler and stopped touching its allocations before
//! the scan reads its stack — the same race the original accepts.
//!
//! Because Linux has no API to read another thread's live stack pointer
//! either, the stack pass conservatively scans a signalled thread's entire
//! `[bottom, top)` range rather than `[sp, top)` (`LSan::getStackPointer`'s
//! `TODO: Linux version` branch, replicated here rather than guessed at).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

static HOLDING: AtomicBool = AtomicBool::new(false);
static HOLD_SIGNAL: OnceLock<i32> = OnceLock::new();

fn hold_signal() -> i32 {
    *HOLD_SIGNAL.get_or_init(|| unsafe { libc::SIGRTMIN() })
}

extern "C" fn hold_on(_sig: i32) {
    while HOLDING.load(Ordering::SeqCst) {
        std::hint::spin_loop();
    }
}

/// Installs the hold-on handler and opens the "stop the world" window:
/// every thread later signalled via [`suspend`] will spin in [`hold_on`]
/// until [`release_all`] is called.
pub fn begin_hold() {
    HOLDING.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(hold_signal(), hold_on as usize);
    }
}

/// Signals `pthread` to enter the hold handler. Returns whether the signal
/// was delivered (a dead or exiting thread makes `pthread_kill` fail).
pub fn suspend(pthread: libc::pthread_t) -> bool {
    unsafe { libc::pthread_kill(pthread, hold_signal()) == 0 }
}

/// Clears the hold flag, releasing every thread spinning in [`hold_on`] at
/// once — mirrors the original's single shared `holding = false` at the end
/// of classification rather than resuming threads one at a time.
pub fn release_all() {
    HOLDING.store(false, Ordering::SeqCst);
}
