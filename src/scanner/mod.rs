//! The reachability scanner (§4.C8).
//!
//! Stops every other thread, word-scans stacks, loaded images' writable data
//! segments, and thread-control blocks as root sets, then walks the pointer
//! graph inside each discovered allocation. Grounded on
//! `LSan::classifyLeaks`/`LSan::suspendThreads`/`LSan::resumeThreads`.

pub mod regions;
mod runtime;
mod tls;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;

use crate::classify::{align_down, align_up, classify_record_graph, RecordArena};
use crate::leak_kind::LeakKind;
use crate::thread_registry::ThreadRegistry;
use regions::LoadedRegion;

/// Root indices discovered per pass, plus threads the scanner couldn't stop
/// or restart — the report assembler (§4.C11) turns the latter into hints.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub stack_roots: Vec<usize>,
    pub global_roots: Vec<usize>,
    pub tls_roots: Vec<usize>,
    pub runtime_roots: Vec<usize>,
    pub lost_roots: Vec<usize>,
    pub unsuspended_threads: Vec<u64>,
    pub resume_failed_threads: Vec<u64>,
}

/// Runs the full pass order against `arena`, mutating every record's
/// `leak_kind`/`image_name`/`via_me` in place and returning the root set
/// each pass discovered.
pub fn run(arena: &mut RecordArena, registry: &ThreadRegistry) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();

    // Pass 1: language-runtime roots (Objective-C class registry).
    runtime::classify_runtime_roots(arena, &mut outcome.runtime_roots);

    let threads = registry.live_snapshot();
    let calling = unsafe { libc::pthread_self() };
    let threaded = registry.is_threaded();

    let mut suspended = Vec::new();
    if threaded {
        begin_hold();
        for (thread_id, pthread, _bounds) in &threads {
            if unsafe { libc::pthread_equal(*pthread, calling) } != 0 {
                continue;
            }
            if suspend(*pthread) {
                suspended.push(*thread_id);
            } else {
                outcome.unsuspended_threads.push(*thread_id);
            }
        }
    }

    // Pass 2: stacks.
    for (thread_id, pthread, bounds) in &threads {
        let is_calling = unsafe { libc::pthread_equal(*pthread, calling) } != 0;
        if !is_calling && outcome.unsuspended_threads.contains(thread_id) {
            continue;
        }
        let begin = if is_calling { current_stack_pointer() } else { bounds.bottom };
        unsafe {
            word_scan(
                arena,
                begin,
                bounds.top,
                LeakKind::ReachableDirect,
                LeakKind::ReachableIndirect,
                None,
                false,
                &mut outcome.stack_roots,
            );
        }
    }

    // Pass 3: globals.
    for loaded in regions::loaded_regions() {
        unsafe {
            word_scan(
                arena,
                loaded.region.begin,
                loaded.region.end,
                LeakKind::GlobalDirect,
                LeakKind::GlobalIndirect,
                Some(&loaded),
                false,
                &mut outcome.global_roots,
            );
        }
    }

    // Pass 4: thread-locals.
    let tcb_size = tls::thread_control_block_size();
    for (thread_id, pthread, _bounds) in &threads {
        let is_calling = unsafe { libc::pthread_equal(*pthread, calling) } != 0;
        if !is_calling && outcome.unsuspended_threads.contains(thread_id) {
            continue;
        }
        let (begin, end) = tls::tcb_bounds(*pthread as usize, tcb_size);
        unsafe {
            word_scan(
                arena,
                begin,
                end,
                LeakKind::TlsDirect,
                LeakKind::TlsIndirect,
                None,
                false,
                &mut outcome.tls_roots,
            );
        }
    }

    // Pass 5 (declarative suppression) runs after this function returns,
    // once the suppression engine — which this module has no dependency on
    // — has loaded (§4.C10, driven from
    // `crate::tracker::global::GlobalTracker::classify_and_report`).

    // Pass 6: runtime per-thread dictionary (macOS only).
    runtime::classify_runtime_tls(arena, &mut outcome.tls_roots);

    if threaded {
        for (thread_id, pthread, _bounds) in &threads {
            if unsafe { libc::pthread_equal(*pthread, calling) } != 0 {
                continue;
            }
            if !suspended.contains(thread_id) {
                continue;
            }
            if !resume(*pthread) {
                outcome.resume_failed_threads.push(*thread_id);
            }
        }
        release_all();
    }

    // Finalisation: anything still unclassified is unreachable.
    for idx in 0..arena.len() {
        if arena.get(idx).leak_kind != LeakKind::Unclassified {
            continue;
        }
        arena.get_mut(idx).leak_kind = LeakKind::UnreachableDirect;
        unsafe { classify_record_graph(arena, idx, LeakKind::UnreachableIndirect, false) };
        outcome.lost_roots.push(idx);
    }

    outcome
}

#[cfg(target_os = "linux")]
fn begin_hold() {
    linux::begin_hold();
}
#[cfg(target_os = "linux")]
fn suspend(pthread: libc::pthread_t) -> bool {
    linux::suspend(pthread)
}
#[cfg(target_os = "linux")]
fn resume(_pthread: libc::pthread_t) -> bool {
    true
}
#[cfg(target_os = "linux")]
fn release_all() {
    linux::release_all();
}

#[cfg(target_os = "macos")]
fn begin_hold() {}
#[cfg(target_os = "macos")]
fn suspend(pthread: libc::pthread_t) -> bool {
    macos::suspend(pthread)
}
#[cfg(target_os = "macos")]
fn resume(pthread: libc::pthread_t) -> bool {
    macos::resume(pthread)
}
#[cfg(target_os = "macos")]
fn release_all() {}

/// Approximates the calling thread's current stack pointer by taking the
/// address of a local variable — Rust has no portable `__builtin_frame_address`,
/// and this is the idiomatic stand-in.
fn current_stack_pointer() -> usize {
    let probe: u8 = 0;
    &probe as *const u8 as usize
}

/// Scans the aligned words of `[begin, end)`, classifying any word that
/// matches a live allocation's pointer (directly, or through one of the
/// four derived forms — see [`RecordArena::find_with_specials`]).
///
/// # Safety
/// `[begin, end)` must be a readable range for the duration of the scan —
/// true for a thread's own stack (reading one's own in-use stack memory),
/// or another thread's stack/TCB while that thread is confirmed held via
/// [`suspend`], or a region [`regions::loaded_regions`] reports as part of a
/// live loaded image's writable data.
unsafe fn word_scan(
    arena: &mut RecordArena,
    begin: usize,
    end: usize,
    direct: LeakKind,
    indirect: LeakKind,
    region: Option<&LoadedRegion>,
    reclassify: bool,
    roots: &mut Vec<usize>,
) {
    let word = std::mem::size_of::<usize>();
    if begin >= end {
        return;
    }
    let begin = align_up(begin, word);
    let end = align_down(end, word);
    let mut addr = begin;
    while addr < end {
        let candidate = unsafe { std::ptr::read_volatile(addr as *const usize) };
        addr += word;

        let Some(idx) = arena.find_with_specials(candidate) else {
            continue;
        };
        if arena.get(idx).is_deleted() {
            continue;
        }

        let current = arena.get(idx).leak_kind;
        if LeakKind::should_replace(current, direct, reclassify) {
            arena.get_mut(idx).leak_kind = direct;
            if let Some(loaded) = region {
                arena.get_mut(idx).image_name = Some(loaded.absolute_name.clone());
            }
            roots.push(idx);
        }
        unsafe { classify_record_graph(arena, idx, indirect, reclassify) };
    }
}
