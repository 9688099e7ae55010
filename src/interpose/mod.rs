//! The allocator interposition surface (§4.C7), grounded on
//! `wrap_malloc.cpp`'s `ifNotIgnored` helper.
//!
//! Every exported malloc-family symbol shares the same shape: call the real
//! allocator first, then record the result — unless the calling thread's
//! tracker is already mid-bookkeeping, in which case tracking is skipped
//! entirely. That reentrancy guard exists because this crate never installs
//! a `#[global_allocator]`; it replaces the *libc* symbols directly, which
//! means the ordinary Rust allocations this crate's own bookkeeping performs
//! (a `Vec` push, a `CallStack::capture`) route straight back through these
//! same exported symbols. [`crate::tracker::thread_tracker::ThreadTracker`]
//! uses a reentrant mutex so that self-recursion never deadlocks; the
//! `ignoring` flag is what stops it from being tracked as a leak in its own
//! right.

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;

use std::ffi::c_void;

use crate::callstack::CallStack;
use crate::config::Config;
use crate::crash;
use crate::record::AllocationRecord;
use crate::tracker::{thread_tracker, Tracker};

/// Checks an aligned-allocation request's alignment against the three
/// conditions §4.C7 calls out (zero, not a power of two, not a multiple of
/// the pointer size), warning on each that holds. Unlike the zero-size/
/// free-null diagnostics this one isn't gated by a `Config` switch — the
/// distilled spec phrases it as an unconditional "additionally warn".
pub(crate) fn check_alignment(alignment: usize) {
    let word = std::mem::size_of::<usize>();
    if alignment == 0 {
        tracing::warn!(alignment, "aligned allocation requested with zero alignment");
        return;
    }
    if !alignment.is_power_of_two() {
        tracing::warn!(alignment, "aligned allocation requested with non-power-of-two alignment");
    }
    if alignment % word != 0 {
        tracing::warn!(alignment, pointer_size = word, "aligned allocation requested with alignment that is not a multiple of the pointer size");
    }
}

fn record_new_allocation(ptr: *mut c_void, size: usize) {
    if ptr.is_null() {
        return;
    }
    if crate::tracker::global::instance().is_finished() {
        return;
    }
    thread_tracker::with_current(|tracker| {
        if tracker.ignoring() {
            return;
        }
        let config = crate::config::global();
        if size == 0 && config.zero_size_warn {
            tracing::warn!(pointer = ptr as usize, "zero-size allocation");
        }
        tracker.with_ignoration(|| {
            let stack = CallStack::capture(config.callstack_depth_cap);
            let record = AllocationRecord::new(ptr as usize, size, tracker.thread_id(), stack);
            if config.stats_active {
                crate::tracker::global::instance().stats.add_malloc(size);
            }
            tracker.record_alloc(record);
        });
    });
}

/// Calls `f` (the real allocation), then tracks the result unless this
/// thread's bookkeeping is already in progress.
pub(crate) fn tracked_alloc(size: usize, f: impl FnOnce() -> *mut c_void) -> *mut c_void {
    crate::ensure_started();
    let ptr = f();
    record_new_allocation(ptr, size);
    ptr
}

fn remove_tracked(pointer: *mut c_void) -> (bool, Option<AllocationRecord>) {
    thread_tracker::with_current(|tracker| tracker.with_ignoration(|| tracker.try_remove(pointer as usize)))
}

/// Handles a `free`-site release of `pointer`: a no-op (beyond an optional
/// warning) for `NULL`, a lookup-and-remove for anything else, warning or
/// crashing per [`Config::invalid_free_warn`]/[`Config::invalid_free_crash`]
/// if `pointer` wasn't tracked or was already freed.
pub(crate) fn tracked_free(pointer: *mut c_void) {
    if pointer.is_null() {
        if crate::config::global().free_null_warn {
            tracing::warn!("free(NULL)");
        }
        return;
    }
    if crate::tracker::global::instance().is_finished() {
        return;
    }
    let ignoring = thread_tracker::with_current(|tracker| tracker.ignoring());
    if ignoring {
        return;
    }
    let (found, diagnostic) = remove_tracked(pointer);
    let config = crate::config::global();
    if !found {
        handle_invalid_free(pointer, diagnostic.as_ref(), config);
        return;
    }
    if config.stats_active {
        if let Some(record) = &diagnostic {
            crate::tracker::global::instance().stats.add_free(record.size());
        }
    }
}

fn handle_invalid_free(pointer: *mut c_void, diagnostic: Option<&AllocationRecord>, config: &Config) {
    let is_double_free = diagnostic.is_some();
    if is_double_free {
        tracing::error!(pointer = pointer as usize, "double free detected");
    } else if config.invalid_free_warn {
        tracing::warn!(pointer = pointer as usize, "invalid free of untracked pointer");
    }
    if config.invalid_free_crash {
        crash::report_invalid_free(pointer as usize, is_double_free);
    }
}

/// Handles a `realloc` call (§4.C7's resize semantics, §8's boundary
/// behaviour): a null input is a fresh allocation; a pointer that comes back
/// unchanged is a `change` (the same record, new size, `via_me` linkage
/// preserved — there is only ever one record per pointer, so "preserved" here
/// means the pointer's identity in the map is never dropped and reinserted);
/// a pointer that moves is `{release old, record new}`.
pub(crate) fn tracked_realloc(old_ptr: *mut c_void, new_size: usize, f: impl FnOnce() -> *mut c_void) -> *mut c_void {
    if old_ptr.is_null() {
        return tracked_alloc(new_size, f);
    }
    if crate::tracker::global::instance().is_finished() {
        return f();
    }
    let ignoring = thread_tracker::with_current(|tracker| tracker.ignoring());
    if ignoring {
        return f();
    }
    let new_ptr = f();
    if new_ptr.is_null() {
        return new_ptr;
    }
    crate::ensure_started();
    if new_ptr == old_ptr {
        thread_tracker::with_current(|tracker| {
            tracker.with_ignoration(|| {
                let config = crate::config::global();
                let stack = CallStack::capture(config.callstack_depth_cap);
                let record = AllocationRecord::new(new_ptr as usize, new_size, tracker.thread_id(), stack);
                tracker.change(record);
            });
        });
        return new_ptr;
    }
    let (found, old_record) = remove_tracked(old_ptr);
    let config = crate::config::global();
    if config.stats_active && found {
        if let Some(record) = &old_record {
            crate::tracker::global::instance().stats.add_free(record.size());
        }
    }
    record_new_allocation(new_ptr, new_size);
    new_ptr
}
