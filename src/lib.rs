//! A dynamically-loaded runtime memory-leak sanitizer.
//!
//! Loaded ahead of libc (`LD_PRELOAD` on Linux, `DYLD_INSERT_LIBRARIES` on
//! macOS), this crate interposes the allocator, tracks every live
//! allocation per thread, and at process exit stops every other thread,
//! walks stacks/globals/thread-locals/runtime roots as a reachability
//! graph, and reports whatever is left as a classified leak.
//!
//! Built both as a `cdylib` (for actual interposition) and as an `rlib`,
//! so the classify → suppress → report pipeline in [`classify_and_render`]
//! can be exercised directly, without a real preloaded child process.

pub mod callstack;
pub mod classify;
pub mod config;
pub mod crash;
pub mod error;
mod interpose;
pub mod leak_kind;
pub mod pool;
pub mod real_alloc;
pub mod record;
pub mod report;
pub mod scanner;
pub mod stats;
pub mod suppression;
pub mod thread_registry;
pub mod tracker;

use std::sync::Once;

static STARTUP: Once = Once::new();

/// Installs the fault-signal handlers and, on macOS, the tracked malloc
/// zone — exactly once, idempotently, the first time any tracked
/// allocation path runs.
///
/// The distilled spec's process-startup primitive (§6.1, macOS) names a
/// dylib constructor as the ideal place to do this; no dependency in this
/// crate's stack provides one, and nothing short of that runs any earlier
/// than the first allocation this module's own interposed entry points
/// would otherwise need to catch. Calling this lazily from every entry
/// point (§4.C7) reaches the same steady state a constructor would, at
/// the cost of not tracking the handful of allocations libmalloc performs
/// against its *own* default zone before the first `malloc`/`zone_malloc`
/// this crate sees — an accepted, documented gap rather than a resolved
/// one.
pub(crate) fn ensure_started() {
    STARTUP.call_once(|| {
        crash::install();
        #[cfg(target_os = "macos")]
        interpose::macos::install_zone();
    });
}

/// Runs the classify → suppress → report pipeline against every live
/// allocation and prints the result, exactly once — called from the
/// wrapped `exit`/`_exit` entry points (§4.C7) rather than a `Drop` or
/// `atexit` hook, so it still runs while every other thread can be
/// stopped and scanned.
pub(crate) fn run_exit_hook() {
    tracker::global::instance().classify_and_report();
}

/// Runs the full classify → suppress → report pipeline over an explicit
/// snapshot of allocation records and an explicit thread registry,
/// touching no process-global state — the pure core both
/// [`run_exit_hook`] (over the real process-wide singletons) and this
/// crate's integration tests (over a registry and records they built
/// themselves) drive.
///
/// Already-deleted records are dropped before classification begins
/// (§4.C8/C9 preparation step); callers holding onto live trackers should
/// have purged those first so this function only ever sees what
/// [`crate::tracker::global::GlobalTracker::purge_deleted_everywhere`]
/// would leave behind.
pub fn classify_and_render(
    records: Vec<record::AllocationRecord>,
    registry: &thread_registry::ThreadRegistry,
    config: &config::Config,
) -> (String, classify::LeakKindStats) {
    let live: Vec<_> = records.into_iter().filter(|r| !r.is_deleted()).collect();
    let mut arena = classify::RecordArena::new(live);
    let outcome = scanner::run(&mut arena, registry);

    let mut stack_roots = outcome.stack_roots;
    let mut global_roots = outcome.global_roots;
    let mut tls_roots = outcome.tls_roots;
    let mut lost_roots = outcome.lost_roots;
    let mut runtime_roots = outcome.runtime_roots;

    // Runtime-owned memory (pass 1) is never reported as a leak, direct or
    // indirect.
    for &idx in &runtime_roots {
        arena.get_mut(idx).suppressed = true;
        for child in arena.get(idx).via_me.clone() {
            arena.get_mut(child).suppressed = true;
        }
    }

    let suppression_engine = suppression::SuppressionEngine::load(config);
    let regions = scanner::regions::loaded_regions();

    // Pass 5: apply the declarative suppression engine (§4.C8/§4.C10) — a
    // match sets `suppressed` so `classify::aggregate` skips the record
    // entirely, regardless of which suppression matched. A suppression whose
    // own `"type"` field names a TLS leak kind (§6.3) can, by construction of
    // `Suppression::matches`, only ever match a record already classified as
    // thread-local; for that narrow case the direct/indirect flip is kept in
    // sync and the root moved into `tls_roots` before the record is
    // suppressed, so the bucket totals stay internally consistent. Every
    // other suppression is a plain hide, not a reclassification.
    for idx in 0..arena.len() {
        if arena.get(idx).suppressed {
            continue;
        }
        let Some(suppression) = suppression_engine.matching(arena.get(idx), &regions) else {
            continue;
        };
        let is_tls_suppression = matches!(
            suppression.leak_kind(),
            Some(leak_kind::LeakKind::TlsDirect) | Some(leak_kind::LeakKind::TlsIndirect)
        );
        if is_tls_suppression {
            let was_direct = arena.get(idx).leak_kind.is_direct();
            if was_direct {
                stack_roots.retain(|&i| i != idx);
                global_roots.retain(|&i| i != idx);
                lost_roots.retain(|&i| i != idx);
                runtime_roots.retain(|&i| i != idx);
                if !tls_roots.contains(&idx) {
                    tls_roots.push(idx);
                }
                arena.get_mut(idx).leak_kind = leak_kind::LeakKind::TlsDirect;
            } else {
                arena.get_mut(idx).leak_kind = leak_kind::LeakKind::TlsIndirect;
            }
            unsafe { classify::classify_record_graph(&mut arena, idx, leak_kind::LeakKind::TlsIndirect, true) };
        }
        arena.get_mut(idx).suppressed = true;
        for child in arena.get(idx).via_me.clone() {
            arena.get_mut(child).suppressed = true;
        }
    }

    // First-party ("system library") suppression is unconditional and
    // independent of the declarative list (§4.C10).
    for idx in 0..arena.len() {
        if arena.get(idx).suppressed {
            continue;
        }
        let is_system = arena
            .get(idx)
            .image_name
            .as_deref()
            .map(|name| suppression_engine.is_system_library(name))
            .unwrap_or(false);
        if is_system {
            arena.get_mut(idx).suppressed = true;
        }
    }

    let mut stats = classify::aggregate(&mut arena, &stack_roots, &global_roots, &tls_roots, &lost_roots, &runtime_roots);
    stats.unsuspended_threads = outcome.unsuspended_threads;
    stats.resume_failed_threads = outcome.resume_failed_threads;

    let report_text = report::assemble(&arena, &stats, config);
    (report_text, stats)
}
