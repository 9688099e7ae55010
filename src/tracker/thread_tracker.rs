//! The per-thread allocation tracker (§4.C4).
//!
//! Grounded on `trackers::TLSTracker`: one instance per thread, reachable
//! from that thread without locking in the common case, holding its own
//! [`crate::tracker::map::TrackerMap`] until the thread dies or calls
//! [`Tracker::finish`] explicitly, at which point its remaining records are
//! folded into the [`crate::tracker::global::GlobalTracker`].

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::ReentrantMutex;
use std::cell::RefCell;

use super::map::TrackerMap;
use super::{global, Tracker};
use crate::pool::{PoolAllocator, PoolHandle};
use crate::record::AllocationRecord;

cfg_if::cfg_if! {
    if #[cfg(feature = "dyn_thread_local")] {
        // Always resolve the calling thread's tracker through pthread's own
        // dynamic TLS API rather than Rust's static `thread_local!` — useful
        // when this library is loaded into a process with many other
        // libraries whose conflicting TLS models make static thread-local
        // access unreliable (see the feature's doc comment in Cargo.toml).
        use std::os::raw::c_void;
        use std::sync::OnceLock;

        static KEY: OnceLock<libc::pthread_key_t> = OnceLock::new();

        extern "C" fn destroy_tracker(raw: *mut c_void) {
            drop(unsafe { Box::from_raw(raw as *mut Rc<ThreadTracker>) });
        }

        fn key() -> libc::pthread_key_t {
            *KEY.get_or_init(|| unsafe {
                let mut key: libc::pthread_key_t = std::mem::zeroed();
                libc::pthread_key_create(&mut key, Some(destroy_tracker));
                key
            })
        }

        /// Runs `f` with the calling thread's tracker, creating it on first use.
        pub fn with_current<R>(f: impl FnOnce(&ThreadTracker) -> R) -> R {
            let k = key();
            let existing = unsafe { libc::pthread_getspecific(k) };
            let boxed: *mut Rc<ThreadTracker> = if existing.is_null() {
                let tracker = Rc::new(ThreadTracker::new());
                global::instance().register(tracker.thread_id(), Rc::downgrade(&tracker));
                let raw = Box::into_raw(Box::new(tracker));
                unsafe { libc::pthread_setspecific(k, raw as *mut c_void) };
                raw
            } else {
                existing as *mut Rc<ThreadTracker>
            };
            f(unsafe { &*boxed })
        }
    } else {
        thread_local! {
            /// The calling thread's tracker, created on first use and torn down
            /// (via its `Drop` impl, which calls [`Tracker::finish`]) when the
            /// thread's TLS is destroyed — the Rust analogue of `TLSTracker`'s
            /// `pthread_key` destructor.
            static THREAD_TRACKER: Rc<ThreadTracker> = {
                let tracker = Rc::new(ThreadTracker::new());
                global::instance().register(tracker.thread_id(), Rc::downgrade(&tracker));
                tracker
            };
        }

        /// Runs `f` with the calling thread's tracker, creating it on first use.
        pub fn with_current<R>(f: impl FnOnce(&ThreadTracker) -> R) -> R {
            THREAD_TRACKER.with(|tracker| f(tracker))
        }
    }
}

pub struct ThreadTracker {
    map: ReentrantMutex<RefCell<TrackerMap>>,
    /// Set while this tracker's own bookkeeping is allocating, so those
    /// allocations are not themselves recorded (§4.C4 reentrancy guard).
    ignore_malloc: Cell<bool>,
    finished: AtomicBool,
    thread_id: u64,
}

// Safety: the Cell/RefCell fields are only ever touched from the owning
// thread; cross-thread access only happens through the ReentrantMutex-guarded
// map during a global sweep, which is why the map itself is the only field
// wrapped for shared access.
unsafe impl Sync for ThreadTracker {}

impl ThreadTracker {
    fn new() -> Self {
        let thread_id = global::next_thread_number();
        let node_pool = PoolAllocator::new(PoolHandle::new());
        global::instance().thread_registry().register_current_thread(thread_id);
        Self {
            map: ReentrantMutex::new(RefCell::new(TrackerMap::new(node_pool))),
            ignore_malloc: Cell::new(false),
            finished: AtomicBool::new(false),
            thread_id,
        }
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn ignoring(&self) -> bool {
        self.ignore_malloc.get()
    }

    pub fn set_ignoring(&self, ignore: bool) {
        self.ignore_malloc.set(ignore);
    }

    /// Runs `f` with allocation recording suppressed for the duration,
    /// restoring the previous flag afterward — mirrors
    /// `ATracker::withIgnoration`.
    pub fn with_ignoration<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = self.ignore_malloc.replace(true);
        let result = f();
        self.ignore_malloc.set(previous);
        result
    }

    pub fn for_each_record(&self, mut f: impl FnMut(&AllocationRecord)) {
        let guard = self.map.lock();
        for (_, record) in guard.borrow().iter() {
            f(record);
        }
    }

    pub fn record_count(&self) -> usize {
        self.map.lock().borrow().len()
    }

    /// Drops this tracker's already-`deleted` records, keeping only live
    /// ones for classification (§4.C8 preparation step).
    pub fn purge_deleted(&self) {
        self.map.lock().borrow_mut().purge_deleted();
    }
}

impl Tracker for ThreadTracker {
    fn record_alloc(&self, record: AllocationRecord) {
        let guard = self.map.lock();
        guard.borrow_mut().insert_or_assign(record.pointer(), record);
    }

    fn maybe_remove(&self, pointer: usize) -> (bool, Option<AllocationRecord>) {
        let config = crate::config::global();
        let guard = self.map.lock();
        let mut map = guard.borrow_mut();
        map.try_remove_or_mark_deleted(
            pointer,
            self.thread_id,
            config.callstack_depth_cap,
            config.invalid_free_tracking,
        )
    }

    fn try_remove(&self, pointer: usize) -> (bool, Option<AllocationRecord>) {
        let local = self.maybe_remove(pointer);
        if local.0 {
            return local;
        }
        let global_result = global::instance().remove_from_others(self.thread_id, pointer);
        if !global_result.0 {
            return match (&global_result.1, &local.1) {
                (Some(g), Some(l)) => {
                    if g.is_more_recent(l) {
                        global_result
                    } else {
                        local
                    }
                }
                (Some(_), None) => global_result,
                _ => local,
            };
        }
        global_result
    }

    fn maybe_change(&self, record: AllocationRecord) -> bool {
        let guard = self.map.lock();
        let mut map = guard.borrow_mut();
        if map.get(record.pointer()).is_none() {
            return false;
        }
        map.insert_or_assign(record.pointer(), record);
        true
    }

    fn change(&self, record: AllocationRecord) {
        let found = self.maybe_change(record.clone());
        if !found {
            global::instance().change_from_others(self.thread_id, record);
        }
    }

    fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ignore_malloc.set(true);
        let guard = self.map.lock();
        let mut map = guard.borrow_mut();
        map.purge_deleted();
        global::instance().absorb_leaks(self.thread_id, &mut map);
    }
}

impl Drop for ThreadTracker {
    fn drop(&mut self) {
        self.finish();
        global::instance().deregister(self.thread_id);
        global::instance().thread_registry().on_thread_exit(self.thread_id);
    }
}
