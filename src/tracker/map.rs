//! A hand-rolled pointer-keyed map, so tracking an allocation never calls
//! back into the allocator being tracked.
//!
//! Grounded on `ATracker::infos`, a `std::map<const void*, MallocInfo,
//! std::less<>, PoolAllocator<...>>` in the original (§4.C3/C4): node
//! storage comes from [`crate::pool::PoolAllocator`], and the bucket array
//! — used more than one at a time, so it mirrors the "count > 1 bypasses
//! the pool" rule from `PoolAllocator::allocate` — comes straight from
//! [`crate::real_alloc`]. Neither path can re-enter this crate's own
//! `malloc`/`free` exports.

use std::ptr;

use crate::pool::PoolAllocator;
use crate::real_alloc;
use crate::record::AllocationRecord;

struct Node {
    key: usize,
    value: Option<AllocationRecord>,
    next: *mut Node,
}

const INITIAL_BUCKETS: usize = 64;
const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

fn hash(key: usize) -> usize {
    // Fibonacci hashing: pointers are already well distributed by alignment,
    // this just spreads the high bits into the low bits used for indexing.
    key.wrapping_mul(0x9E3779B97F4A7C15)
}

pub struct TrackerMap {
    buckets: *mut *mut Node,
    bucket_count: usize,
    len: usize,
    node_pool: PoolAllocator<Node>,
}

// Safety: TrackerMap is always used from behind a Mutex in the trackers that
// own it (§4.C4/C5); it holds no thread affinity itself.
unsafe impl Send for TrackerMap {}

impl TrackerMap {
    pub fn new(node_pool: PoolAllocator<Node>) -> Self {
        let mut map = Self {
            buckets: ptr::null_mut(),
            bucket_count: 0,
            len: 0,
            node_pool,
        };
        map.alloc_buckets(INITIAL_BUCKETS);
        map
    }

    fn alloc_buckets(&mut self, count: usize) {
        let bytes = count * std::mem::size_of::<*mut Node>();
        let raw = real_alloc::malloc(bytes) as *mut *mut Node;
        assert!(!raw.is_null(), "tracker map bucket allocation failed");
        unsafe { raw.write_bytes(0, count) };
        self.buckets = raw;
        self.bucket_count = count;
    }

    fn bucket_index(&self, key: usize) -> usize {
        hash(key) & (self.bucket_count - 1)
    }

    fn maybe_grow(&mut self) {
        if self.len * MAX_LOAD_DEN < self.bucket_count * MAX_LOAD_NUM {
            return;
        }
        let old_buckets = self.buckets;
        let old_count = self.bucket_count;
        self.alloc_buckets(old_count * 2);
        for i in 0..old_count {
            let mut node = unsafe { *old_buckets.add(i) };
            while !node.is_null() {
                let next = unsafe { (*node).next };
                let idx = self.bucket_index(unsafe { (*node).key });
                unsafe {
                    (*node).next = *self.buckets.add(idx);
                    *self.buckets.add(idx) = node;
                }
                node = next;
            }
        }
        real_alloc::free(old_buckets as *mut std::ffi::c_void);
    }

    fn find_node(&self, key: usize) -> *mut Node {
        let idx = self.bucket_index(key);
        let mut node = unsafe { *self.buckets.add(idx) };
        while !node.is_null() {
            if unsafe { (*node).key } == key {
                return node;
            }
            node = unsafe { (*node).next };
        }
        ptr::null_mut()
    }

    pub fn get(&self, key: usize) -> Option<&AllocationRecord> {
        let node = self.find_node(key);
        if node.is_null() {
            None
        } else {
            unsafe { (*node).value.as_ref() }
        }
    }

    pub fn get_mut(&mut self, key: usize) -> Option<&mut AllocationRecord> {
        let node = self.find_node(key);
        if node.is_null() {
            None
        } else {
            unsafe { (*node).value.as_mut() }
        }
    }

    /// Inserts or overwrites the record for `key`, returning the previous
    /// one if there was one.
    pub fn insert_or_assign(&mut self, key: usize, value: AllocationRecord) -> Option<AllocationRecord> {
        let existing = self.find_node(key);
        if !existing.is_null() {
            return unsafe { (*existing).value.replace(value) };
        }

        self.maybe_grow();
        let idx = self.bucket_index(key);
        let node_ptr = self.node_pool.allocate_one();
        assert!(!node_ptr.is_null(), "tracker map node allocation failed");
        unsafe {
            node_ptr.write(Node {
                key,
                value: Some(value),
                next: *self.buckets.add(idx),
            });
            *self.buckets.add(idx) = node_ptr;
        }
        self.len += 1;
        None
    }

    /// Implements the `try_remove`/`maybe_remove` contract of §4.C4: if
    /// `key` is absent, `(false, None)`. If present and already deleted,
    /// `(false, Some(diagnostic))` — a double-free candidate, left in
    /// place. Otherwise the live record is released and its pre-release
    /// snapshot returned as `(true, Some(record))`: marked `deleted` in
    /// place (keeping it around for a future double-free diagnostic) when
    /// `track_invalid_frees` is set, or erased outright when it is not.
    pub fn try_remove_or_mark_deleted(
        &mut self,
        key: usize,
        thread_id: u64,
        depth_cap: usize,
        track_invalid_frees: bool,
    ) -> (bool, Option<AllocationRecord>) {
        let node = self.find_node(key);
        if node.is_null() {
            return (false, None);
        }
        let record = unsafe { (*node).value.as_mut() }.expect("tombstoned node must not outlive its record");
        if record.is_deleted() {
            return (false, Some(record.clone()));
        }
        let snapshot = record.clone();
        if track_invalid_frees {
            record.mark_deleted(thread_id, depth_cap);
        } else {
            self.remove(key);
        }
        (true, Some(snapshot))
    }

    /// Removes every record already marked `deleted` — the classifier's
    /// preparation step (§4.C8) and `finish()`'s pre-absorb sweep (§4.C4)
    /// both need only live records.
    pub fn purge_deleted(&mut self) {
        self.retain_if_not(|record| record.is_deleted());
    }

    /// Removes and returns the record for `key`, if present.
    pub fn remove(&mut self, key: usize) -> Option<AllocationRecord> {
        let idx = self.bucket_index(key);
        let mut prev: *mut Node = ptr::null_mut();
        let mut node = unsafe { *self.buckets.add(idx) };
        while !node.is_null() {
            if unsafe { (*node).key } == key {
                let next = unsafe { (*node).next };
                if prev.is_null() {
                    unsafe { *self.buckets.add(idx) = next };
                } else {
                    unsafe { (*prev).next = next };
                }
                let value = unsafe { (*node).value.take() };
                unsafe {
                    ptr::drop_in_place(node);
                    self.node_pool.deallocate_one(node);
                }
                self.len -= 1;
                return value;
            }
            prev = node;
            node = unsafe { (*node).next };
        }
        None
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over all live entries.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &AllocationRecord)> {
        (0..self.bucket_count).flat_map(move |i| {
            let mut node = unsafe { *self.buckets.add(i) };
            std::iter::from_fn(move || {
                if node.is_null() {
                    return None;
                }
                let current = node;
                node = unsafe { (*current).next };
                unsafe { (*current).value.as_ref().map(|v| ((*current).key, v)) }
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut AllocationRecord)> {
        (0..self.bucket_count).flat_map(move |i| {
            let mut node = unsafe { *self.buckets.add(i) };
            std::iter::from_fn(move || {
                if node.is_null() {
                    return None;
                }
                let current = node;
                node = unsafe { (*current).next };
                unsafe { (*current).value.as_mut().map(|v| ((*current).key, v)) }
            })
        })
    }

    /// Removes every entry for which `predicate` returns `true`.
    pub fn retain_if_not(&mut self, mut predicate: impl FnMut(&AllocationRecord) -> bool) {
        for i in 0..self.bucket_count {
            let mut prev: *mut Node = ptr::null_mut();
            let mut node = unsafe { *self.buckets.add(i) };
            while !node.is_null() {
                let next = unsafe { (*node).next };
                let drop_it = unsafe { (*node).value.as_ref().map(|v| predicate(v)).unwrap_or(false) };
                if drop_it {
                    if prev.is_null() {
                        unsafe { *self.buckets.add(i) = next };
                    } else {
                        unsafe { (*prev).next = next };
                    }
                    unsafe {
                        ptr::drop_in_place(node);
                        self.node_pool.deallocate_one(node);
                    }
                    self.len -= 1;
                } else {
                    prev = node;
                }
                node = next;
            }
        }
    }

    /// Drains all entries out of `self` into the caller, leaving it empty.
    pub fn drain_into(&mut self, mut sink: impl FnMut(usize, AllocationRecord)) {
        for i in 0..self.bucket_count {
            let mut node = unsafe { *self.buckets.add(i) };
            unsafe { *self.buckets.add(i) = ptr::null_mut() };
            while !node.is_null() {
                let next = unsafe { (*node).next };
                if let Some(value) = unsafe { (*node).value.take() } {
                    sink(unsafe { (*node).key }, value);
                }
                unsafe {
                    ptr::drop_in_place(node);
                    self.node_pool.deallocate_one(node);
                }
                node = next;
            }
        }
        self.len = 0;
    }
}

impl Drop for TrackerMap {
    fn drop(&mut self) {
        self.drain_into(|_, _| {});
        if !self.buckets.is_null() {
            real_alloc::free(self.buckets as *mut std::ffi::c_void);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callstack::CallStack;
    use crate::pool::PoolHandle;

    fn map() -> TrackerMap {
        TrackerMap::new(PoolAllocator::new(PoolHandle::new()))
    }

    fn rec(ptr: usize) -> AllocationRecord {
        AllocationRecord::new(ptr, 16, 1, CallStack::capture(2))
    }

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut m = map();
        assert!(m.insert_or_assign(0x10, rec(0x10)).is_none());
        assert_eq!(m.len(), 1);
        assert!(m.get(0x10).is_some());
        let removed = m.remove(0x10);
        assert!(removed.is_some());
        assert!(m.get(0x10).is_none());
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn grows_and_keeps_every_key_reachable() {
        let mut m = map();
        for i in 0..5000usize {
            let key = 0x1000 + i * 16;
            m.insert_or_assign(key, rec(key));
        }
        assert_eq!(m.len(), 5000);
        for i in 0..5000usize {
            let key = 0x1000 + i * 16;
            assert!(m.get(key).is_some(), "missing key {key:#x}");
        }
    }

    #[test]
    fn insert_or_assign_overwrites_existing() {
        let mut m = map();
        m.insert_or_assign(0x20, rec(0x20));
        let prev = m.insert_or_assign(0x20, rec(0x20));
        assert!(prev.is_some());
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn try_remove_marks_deleted_in_place_when_tracking_invalid_frees() {
        let mut m = map();
        m.insert_or_assign(0x50, rec(0x50));
        let (removed, snapshot) = m.try_remove_or_mark_deleted(0x50, 1, 4, true);
        assert!(removed);
        assert!(snapshot.is_some(), "caller still gets the pre-release record");
        assert_eq!(m.len(), 1, "deleted record stays in the map for diagnostics");
        assert!(m.get(0x50).unwrap().is_deleted());
    }

    #[test]
    fn try_remove_erases_when_not_tracking_invalid_frees() {
        let mut m = map();
        m.insert_or_assign(0x60, rec(0x60));
        let (removed, _) = m.try_remove_or_mark_deleted(0x60, 1, 4, false);
        assert!(removed);
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn double_remove_surfaces_diagnostic_without_removing() {
        let mut m = map();
        m.insert_or_assign(0x70, rec(0x70));
        m.try_remove_or_mark_deleted(0x70, 1, 4, true);
        let (removed, diag) = m.try_remove_or_mark_deleted(0x70, 2, 4, true);
        assert!(!removed);
        assert!(diag.is_some());
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn purge_deleted_drops_only_deleted_entries() {
        let mut m = map();
        m.insert_or_assign(0x80, rec(0x80));
        m.insert_or_assign(0x90, rec(0x90));
        m.try_remove_or_mark_deleted(0x80, 1, 4, true);
        m.purge_deleted();
        assert_eq!(m.len(), 1);
        assert!(m.get(0x90).is_some());
    }

    #[test]
    fn retain_if_not_drops_matching_entries() {
        let mut m = map();
        for i in 0..10usize {
            m.insert_or_assign(i + 1, rec(i + 1));
        }
        m.retain_if_not(|_| true);
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn drain_into_empties_the_map() {
        let mut m = map();
        m.insert_or_assign(0x30, rec(0x30));
        m.insert_or_assign(0x40, rec(0x40));
        let mut drained = Vec::new();
        m.drain_into(|k, v| drained.push((k, v)));
        assert_eq!(drained.len(), 2);
        assert!(m.is_empty());
    }
}
