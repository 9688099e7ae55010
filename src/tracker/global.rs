//! The whole-process tracker (§4.C5).
//!
//! Grounded on `LeakSani`'s role as the `ATracker` singleton every
//! `TLSTracker` reports to: a registry of every live thread tracker (for
//! the cross-tracker fallback `TLSTracker::removeMalloc`/`changeMalloc`
//! perform before giving up), plus a map of its own that absorbs whatever a
//! finishing thread tracker was still holding.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, Weak};

use parking_lot::ReentrantMutex;

use super::map::TrackerMap;
use super::thread_tracker::ThreadTracker;
use crate::pool::{PoolAllocator, PoolHandle};
use crate::record::AllocationRecord;
use crate::stats::Stats;
use crate::thread_registry::ThreadRegistry;

struct Registered {
    thread_id: u64,
    tracker: Weak<ThreadTracker>,
}

pub struct GlobalTracker {
    /// §5's "global recursive mutex": the exit-time pass can re-enter this
    /// while already holding the lock (e.g. `absorb_leaks` draining a
    /// finishing thread tracker's map while `classify_and_report` itself is
    /// mid-sweep), matching [`super::thread_tracker::ThreadTracker`]'s own
    /// `ReentrantMutex<RefCell<TrackerMap>>`.
    map: ReentrantMutex<RefCell<TrackerMap>>,
    /// The separate, non-recursive tracker-set mutex (§5): plain
    /// `std::sync::Mutex` suffices since nothing re-enters it.
    registry: Mutex<Vec<Registered>>,
    next_thread_id: AtomicU64,
    thread_registry: ThreadRegistry,
    /// Set once the exit-time classify-and-report pass has run, so a
    /// second call (e.g. both `exit` and an `atexit`-style teardown path
    /// racing) is a no-op rather than a second, inconsistent report.
    finished: AtomicBool,
    pub stats: Stats,
}

static INSTANCE: OnceLock<GlobalTracker> = OnceLock::new();

pub fn instance() -> &'static GlobalTracker {
    INSTANCE.get_or_init(GlobalTracker::new)
}

pub fn next_thread_number() -> u64 {
    instance().next_thread_id.fetch_add(1, Ordering::Relaxed)
}

impl GlobalTracker {
    fn new() -> Self {
        Self {
            map: ReentrantMutex::new(RefCell::new(TrackerMap::new(PoolAllocator::new(PoolHandle::new())))),
            registry: Mutex::new(Vec::new()),
            next_thread_id: AtomicU64::new(1),
            thread_registry: ThreadRegistry::new(),
            finished: AtomicBool::new(false),
            stats: Stats::new(),
        }
    }

    /// The thread-stack-bounds registry every thread tracker registers
    /// itself with on creation, and the scanner (§4.C8) reads from to walk
    /// live stacks as a root set.
    pub fn thread_registry(&self) -> &ThreadRegistry {
        &self.thread_registry
    }

    /// Whether the exit-time classify-and-report pass has already run —
    /// consulted by the interposer (§4.C7) so allocation traffic during
    /// process teardown after that point is left untracked rather than
    /// reported against a report that has already printed.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Runs the classify → suppress → report pipeline over every live
    /// allocation and prints the result, exactly once (§4.C8–C11).
    pub fn classify_and_report(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        self.purge_deleted_everywhere();
        let records = self.snapshot_all();
        let config = crate::config::global();
        let (report_text, _stats) = crate::classify_and_render(records, &self.thread_registry, config);
        crate::report::print(&report_text, config);
    }

    /// Registers a newly-created thread tracker so it can be consulted by
    /// other threads' cross-tracker fallbacks.
    pub fn register(&self, thread_id: u64, tracker: Weak<ThreadTracker>) {
        self.registry.lock().unwrap().push(Registered { thread_id, tracker });
    }

    pub fn deregister(&self, thread_id: u64) {
        self.registry.lock().unwrap().retain(|r| r.thread_id != thread_id);
    }

    /// Records a global (thread-independent) allocation directly, used for
    /// allocations observed before any thread tracker exists (§4.C4 edge
    /// case: very early process startup).
    pub fn record_alloc_direct(&self, record: AllocationRecord) {
        let guard = self.map.lock();
        guard.borrow_mut().insert_or_assign(record.pointer(), record);
    }

    /// Consults every other registered thread tracker, then this tracker's
    /// own map, for `pointer` — the fallback `TLSTracker::removeMalloc`
    /// performs when the calling thread doesn't have the record itself.
    ///
    /// Per §4.C5, every other tracker is checked: a live removal (`found`)
    /// wins immediately (the pointer-uniqueness invariant means at most one
    /// tracker can hold a live record for it), but a deleted-record
    /// diagnostic doesn't short-circuit the scan — the most recently
    /// deleted diagnostic across every tracker (and this tracker's own map)
    /// is the one returned.
    pub fn remove_from_others(&self, excluding_thread_id: u64, pointer: usize) -> (bool, Option<AllocationRecord>) {
        let mut best_diagnostic: Option<AllocationRecord> = None;
        let registry = self.registry.lock().unwrap();
        for entry in registry.iter() {
            if entry.thread_id == excluding_thread_id {
                continue;
            }
            if let Some(tracker) = entry.tracker.upgrade() {
                let (found, record) = tracker.maybe_remove(pointer);
                if found {
                    return (true, record);
                }
                if let Some(candidate) = record {
                    best_diagnostic = Some(match best_diagnostic {
                        Some(current) if !candidate.is_more_recent(&current) => current,
                        _ => candidate,
                    });
                }
            }
        }
        drop(registry);
        self.finish_remove_with_candidate(pointer, excluding_thread_id, best_diagnostic)
    }

    /// Consults this tracker's own map as the final fallback, returning a
    /// live removal if found, otherwise the more recent of this map's own
    /// diagnostic and whatever diagnostic the other trackers already
    /// surfaced.
    fn finish_remove_with_candidate(
        &self,
        pointer: usize,
        thread_id: u64,
        candidate: Option<AllocationRecord>,
    ) -> (bool, Option<AllocationRecord>) {
        let config = crate::config::global();
        let guard = self.map.lock();
        let (found, record) = guard.borrow_mut().try_remove_or_mark_deleted(
            pointer,
            thread_id,
            config.callstack_depth_cap,
            config.invalid_free_tracking,
        );
        if found {
            return (true, record);
        }
        let winner = match (record, candidate) {
            (Some(a), Some(b)) => Some(if a.is_more_recent(&b) { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        (false, winner)
    }

    /// Consults every other registered thread tracker, then this tracker's
    /// own map, replacing the record for `record`'s pointer if found
    /// anywhere — the fallback `TLSTracker::changeMalloc` performs.
    pub fn change_from_others(&self, excluding_thread_id: u64, record: AllocationRecord) -> bool {
        let registry = self.registry.lock().unwrap();
        for entry in registry.iter() {
            if entry.thread_id == excluding_thread_id {
                continue;
            }
            if let Some(tracker) = entry.tracker.upgrade() {
                if tracker.maybe_change(record.clone()) {
                    return true;
                }
            }
        }
        drop(registry);
        let guard = self.map.lock();
        let mut map = guard.borrow_mut();
        if map.get(record.pointer()).is_none() {
            return false;
        }
        map.insert_or_assign(record.pointer(), record);
        true
    }

    /// Folds a finishing thread tracker's remaining records into this
    /// tracker's map (`LeakSani::absorbLeaks`).
    pub fn absorb_leaks(&self, _thread_id: u64, source: &mut TrackerMap) {
        let guard = self.map.lock();
        let mut map = guard.borrow_mut();
        source.drain_into(|pointer, record| {
            map.insert_or_assign(pointer, record);
        });
    }

    /// Drops every record already marked `deleted` from this tracker's own
    /// map and every still-registered thread tracker's map — the
    /// classifier's preparation step (§4.C8/C9): only live records are
    /// eligible for reachability classification, dead ones are left behind
    /// for double-free diagnostics only.
    pub fn purge_deleted_everywhere(&self) {
        let registry = self.registry.lock().unwrap();
        for entry in registry.iter() {
            if let Some(tracker) = entry.tracker.upgrade() {
                tracker.purge_deleted();
            }
        }
        drop(registry);
        self.map.lock().borrow_mut().purge_deleted();
    }

    /// Snapshots every still-live allocation across the whole process: every
    /// registered thread tracker's map plus this tracker's own, for the
    /// classifier (§4.C9) to run against at exit. Callers should have
    /// already run [`GlobalTracker::purge_deleted_everywhere`] so deleted
    /// records don't show up as spurious leaks.
    pub fn snapshot_all(&self) -> Vec<AllocationRecord> {
        let mut all = Vec::new();
        let registry = self.registry.lock().unwrap();
        for entry in registry.iter() {
            if let Some(tracker) = entry.tracker.upgrade() {
                tracker.for_each_record(|record| all.push(record.clone()));
            }
        }
        drop(registry);
        let guard = self.map.lock();
        for (_, record) in guard.borrow().iter() {
            all.push(record.clone());
        }
        all
    }

    pub fn live_count(&self) -> usize {
        let registry = self.registry.lock().unwrap();
        let mut count = self.map.lock().borrow().len();
        for entry in registry.iter() {
            if let Some(tracker) = entry.tracker.upgrade() {
                count += tracker.record_count();
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callstack::CallStack;

    #[test]
    fn record_direct_then_remove() {
        let tracker = GlobalTracker::new();
        tracker.record_alloc_direct(AllocationRecord::new(0x500, 8, 1, CallStack::capture(2)));
        assert_eq!(tracker.map.lock().borrow().len(), 1);
        let removed = tracker.map.lock().borrow_mut().remove(0x500);
        assert!(removed.is_some());
    }

    #[test]
    fn remove_from_others_falls_back_to_its_own_map_diagnostic() {
        let tracker = GlobalTracker::new();
        let config = crate::config::global();
        tracker.record_alloc_direct(AllocationRecord::new(0x900, 8, 1, CallStack::capture(2)));
        tracker
            .map
            .lock()
            .borrow_mut()
            .try_remove_or_mark_deleted(0x900, 1, config.callstack_depth_cap, true);

        let (found, diagnostic) = tracker.remove_from_others(2, 0x900);
        assert!(!found, "the only record for this pointer is already deleted");
        assert!(diagnostic.is_some(), "the global map's own tombstone must still surface as a diagnostic");
    }
}
