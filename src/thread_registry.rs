//! Thread stack-bounds registry (§4.C6), grounded on `ThreadInfo`.
//!
//! The scanner (§4.C8) needs the `[bottom, top)` address range of every
//! live thread's stack to walk as a root set. Linux has no cheap way to ask
//! "is this thread still alive" other than tracking it yourself, so dead
//! entries are tombstoned (`dead = true`) rather than removed, same as the
//! original; macOS thread death is instead detected by a failed
//! `thread_suspend` during the scan, so entries there are simply erased by
//! [`ThreadRegistry::remove`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct StackBounds {
    pub bottom: usize,
    pub top: usize,
}

struct Entry {
    thread_id: u64,
    pthread: libc::pthread_t,
    bounds: StackBounds,
    dead: bool,
}

pub struct ThreadRegistry {
    entries: Mutex<Vec<Entry>>,
    /// Whether more than the main thread has ever been observed — the
    /// scanner can skip the whole stop-the-world dance on a single-threaded
    /// process (§4.C8 fast path).
    is_threaded: AtomicBool,
}

impl ThreadRegistry {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            is_threaded: AtomicBool::new(false),
        }
    }

    pub fn is_threaded(&self) -> bool {
        self.is_threaded.load(Ordering::Relaxed)
    }

    /// Registers the calling thread's stack bounds, resolved through
    /// `pthread_getattr_np`/`pthread_attr_getstack` on Linux and
    /// `pthread_get_stackaddr_np`/`pthread_get_stacksize_np` on macOS.
    pub fn register_current_thread(&self, thread_id: u64) {
        let bounds = current_thread_stack_bounds();
        let pthread = unsafe { libc::pthread_self() };
        let mut entries = self.entries.lock().unwrap();
        if !entries.is_empty() {
            self.is_threaded.store(true, Ordering::Relaxed);
        }
        entries.push(Entry {
            thread_id,
            pthread,
            bounds,
            dead: false,
        });
    }

    #[cfg(target_os = "linux")]
    pub fn mark_dead(&self, thread_id: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.thread_id == thread_id) {
            entry.dead = true;
        }
    }

    #[cfg(target_os = "macos")]
    pub fn remove(&self, thread_id: u64) {
        self.entries.lock().unwrap().retain(|e| e.thread_id != thread_id);
    }

    /// Called from a thread tracker's `Drop` impl: tombstones the entry on
    /// Linux (the scanner may still need to annotate a just-exited thread's
    /// residual allocations), erases it outright on macOS.
    pub fn on_thread_exit(&self, thread_id: u64) {
        #[cfg(target_os = "linux")]
        self.mark_dead(thread_id);
        #[cfg(target_os = "macos")]
        self.remove(thread_id);
    }

    /// Snapshots every thread considered alive, for the scanner to walk.
    pub fn live_snapshot(&self) -> Vec<(u64, libc::pthread_t, StackBounds)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !e.dead)
            .map(|e| (e.thread_id, e.pthread, e.bounds))
            .collect()
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn current_thread_stack_bounds() -> StackBounds {
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
            return StackBounds { bottom: 0, top: 0 };
        }
        let mut stack_addr: *mut std::ffi::c_void = std::ptr::null_mut();
        let mut stack_size: usize = 0;
        libc::pthread_attr_getstack(&attr, &mut stack_addr, &mut stack_size);
        libc::pthread_attr_destroy(&mut attr);
        let bottom = stack_addr as usize;
        StackBounds {
            bottom,
            top: bottom + stack_size,
        }
    }
}

#[cfg(target_os = "macos")]
fn current_thread_stack_bounds() -> StackBounds {
    unsafe {
        let this = libc::pthread_self();
        let top = libc::pthread_get_stackaddr_np(this) as usize;
        let size = libc::pthread_get_stacksize_np(this);
        StackBounds {
            bottom: top.saturating_sub(size),
            top,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_second_thread_flips_is_threaded() {
        let registry = ThreadRegistry::new();
        assert!(!registry.is_threaded());
        registry.register_current_thread(1);
        assert!(!registry.is_threaded());
        std::thread::spawn(|| {}).join().unwrap();
        registry.register_current_thread(2);
        assert!(registry.is_threaded());
    }

    #[test]
    fn live_snapshot_has_sane_bounds_for_current_thread() {
        let registry = ThreadRegistry::new();
        registry.register_current_thread(1);
        let snapshot = registry.live_snapshot();
        assert_eq!(snapshot.len(), 1);
        let (_, _, bounds) = snapshot[0];
        assert!(bounds.top >= bounds.bottom);
    }
}
