//! A hand-rolled object pool and pool allocator (§4.C3).
//!
//! Grounded on `original_source/src/allocators/ObjectPool.{hpp,cpp}` and
//! `PoolAllocator.hpp`: the tracker's own bookkeeping containers must never
//! call back into the allocator they are tracking, so they are backed by a
//! freestanding pool that talks to [`crate::real_alloc`] directly. The
//! freelist is threaded through the bytes of freed chunks themselves rather
//! than kept in a side structure, so a pool with zero live allocations costs
//! nothing beyond the blocks it has not yet released.
//!
//! Simplified from the original in one respect: growth is geometric up to a
//! cap and blocks are never released back to the real allocator once
//! acquired (the original shrinks its per-block growth factor and frees a
//! block outright once its last chunk is deallocated). Holding onto emptied
//! blocks trades a little memory for a much smaller, panic-free
//! implementation, which matters more here since this code must never
//! itself become a source of the leaks it is trying to report.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use crate::real_alloc;

const MAX_FACTOR: usize = 50;

struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

/// A pool of same-sized chunks, each large enough to hold a `FreeNode` when
/// free and a `T` when allocated.
pub struct ObjectPool {
    object_size: usize,
    block_size: usize,
    factor: usize,
    free: Option<NonNull<FreeNode>>,
    /// Raw blocks ever requested from the real allocator, for cleanup.
    blocks: Vec<(*mut c_void, usize)>,
}

// Safety: an ObjectPool is only ever accessed through a Mutex.
unsafe impl Send for ObjectPool {}

impl ObjectPool {
    pub fn new(object_size: usize, block_size: usize) -> Self {
        assert!(
            object_size >= 2 * mem::size_of::<usize>(),
            "pooled objects must be at least two pointers wide"
        );
        Self {
            object_size,
            block_size,
            factor: 1,
            free: None,
            blocks: Vec::new(),
        }
    }

    pub fn object_size(&self) -> usize {
        self.object_size
    }

    fn grow(&mut self) {
        let count = self.block_size * self.factor;
        let bytes = count * self.object_size;
        let buffer = real_alloc::malloc(bytes) as *mut u8;
        if buffer.is_null() {
            return;
        }
        self.blocks.push((buffer as *mut c_void, bytes));
        for i in 0..count {
            unsafe {
                let chunk = buffer.add(i * self.object_size) as *mut FreeNode;
                chunk.write(FreeNode { next: self.free });
                self.free = Some(NonNull::new_unchecked(chunk));
            }
        }
        if self.factor < MAX_FACTOR {
            self.factor += 1;
        }
    }

    /// Hands out one chunk, growing the pool first if it is empty.
    pub fn allocate(&mut self) -> *mut c_void {
        if self.free.is_none() {
            self.grow();
        }
        match self.free {
            Some(node) => unsafe {
                self.free = node.as_ref().next;
                node.as_ptr() as *mut c_void
            },
            None => std::ptr::null_mut(),
        }
    }

    /// Returns a chunk previously handed out by [`ObjectPool::allocate`].
    ///
    /// # Safety
    /// `pointer` must have come from this same pool's `allocate` and not
    /// already have been deallocated.
    pub unsafe fn deallocate(&mut self, pointer: *mut c_void) {
        let node = pointer as *mut FreeNode;
        node.write(FreeNode { next: self.free });
        self.free = Some(NonNull::new_unchecked(node));
    }

    /// Folds `other`'s free chunks into this pool. Both pools must share an
    /// object size; `other` is left with an empty freelist.
    pub fn merge(&mut self, other: &mut ObjectPool) {
        debug_assert_eq!(self.object_size, other.object_size);
        if self.free.is_none() {
            self.free = other.free.take();
        } else if let Some(mut tail) = self.free {
            unsafe {
                while let Some(next) = tail.as_ref().next {
                    tail = next;
                }
                tail.as_mut().next = other.free.take();
            }
        }
        self.blocks.append(&mut other.blocks);
    }
}

impl Drop for ObjectPool {
    fn drop(&mut self) {
        for (ptr, _) in self.blocks.drain(..) {
            real_alloc::free(ptr);
        }
    }
}

/// A handle to a family of [`ObjectPool`]s, one per distinct object size,
/// shared (and mergeable) the way `PoolAllocator`'s `shared_ptr<Pools>` is.
#[derive(Clone)]
pub struct PoolHandle {
    pools: Arc<Mutex<Vec<ObjectPool>>>,
}

impl PoolHandle {
    pub fn new() -> Self {
        Self {
            pools: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_pool<R>(&self, size: usize, f: impl FnOnce(&mut ObjectPool) -> R) -> R {
        let mut pools = self.pools.lock().unwrap();
        if let Some(pool) = pools.iter_mut().find(|p| p.object_size() == size) {
            return f(pool);
        }
        pools.push(ObjectPool::new(size, 500));
        let last = pools.last_mut().unwrap();
        f(last)
    }

    pub fn allocate_bytes(&self, size: usize) -> *mut c_void {
        self.with_pool(size, |pool| pool.allocate())
    }

    /// # Safety
    /// `pointer` must have come from `allocate_bytes(size)` on this handle.
    pub unsafe fn deallocate_bytes(&self, pointer: *mut c_void, size: usize) {
        self.with_pool(size, |pool| pool.deallocate(pointer));
    }

    /// Merges `other`'s pools into this handle's, bucketed by object size.
    pub fn merge(&self, other: &PoolHandle) {
        let mut mine = self.pools.lock().unwrap();
        let mut theirs = other.pools.lock().unwrap();
        for pool in theirs.iter_mut() {
            match mine.iter_mut().find(|p| p.object_size() == pool.object_size()) {
                Some(existing) => existing.merge(pool),
                None => {
                    let mut replacement = ObjectPool::new(pool.object_size(), 500);
                    replacement.merge(pool);
                    mine.push(replacement);
                }
            }
        }
    }
}

impl Default for PoolHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A `T`-typed allocator backed by a [`PoolHandle`], for single-object
/// allocations only — multi-element requests bypass the pool and go
/// straight to [`crate::real_alloc`], mirroring the original's behavior for
/// `count > 1`.
pub struct PoolAllocator<T> {
    handle: PoolHandle,
    _marker: PhantomData<T>,
}

impl<T> Clone for PoolAllocator<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PoolAllocator<T> {
    const OBJECT_SIZE: usize = {
        assert!(
            mem::size_of::<T>() >= 2 * mem::size_of::<usize>(),
            "PoolAllocator needs room for two pointers in a freed block"
        );
        mem::size_of::<T>()
    };

    pub fn new(handle: PoolHandle) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn allocate_one(&self) -> *mut T {
        self.handle.allocate_bytes(Self::OBJECT_SIZE) as *mut T
    }

    /// # Safety
    /// `pointer` must have been returned by `allocate_one` on a
    /// `PoolAllocator` sharing this one's handle, and not already freed.
    pub unsafe fn deallocate_one(&self, pointer: *mut T) {
        self.handle
            .deallocate_bytes(pointer as *mut c_void, Self::OBJECT_SIZE);
    }

    pub fn handle(&self) -> &PoolHandle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct Node {
        a: usize,
        b: usize,
        payload: u32,
    }

    #[test]
    fn allocate_then_deallocate_reuses_the_same_chunk() {
        let pool = PoolAllocator::<Node>::new(PoolHandle::new());
        let p1 = pool.allocate_one();
        assert!(!p1.is_null());
        unsafe {
            (*p1).payload = 42;
            pool.deallocate_one(p1);
        }
        let p2 = pool.allocate_one();
        assert_eq!(p1, p2, "freelist should hand the same chunk back out");
        unsafe { pool.deallocate_one(p2) };
    }

    #[test]
    fn grows_past_initial_block_without_reuse_collision() {
        let pool = PoolAllocator::<Node>::new(PoolHandle::new());
        let mut pointers = Vec::new();
        for _ in 0..2000 {
            let p = pool.allocate_one();
            assert!(!p.is_null());
            pointers.push(p);
        }
        let mut unique = pointers.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), pointers.len());
        for p in pointers {
            unsafe { pool.deallocate_one(p) };
        }
    }

    #[test]
    fn merge_combines_freelists_by_size() {
        let a = PoolHandle::new();
        let b = PoolHandle::new();
        let alloc_a = PoolAllocator::<Node>::new(a.clone());
        let alloc_b = PoolAllocator::<Node>::new(b.clone());
        let p = alloc_b.allocate_one();
        unsafe { alloc_b.deallocate_one(p) };
        a.merge(&b);
        let reused = alloc_a.allocate_one();
        assert!(!reused.is_null());
        unsafe { alloc_a.deallocate_one(reused) };
    }
}
