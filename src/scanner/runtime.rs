//! Objective-C runtime root scanning (§4.C8 passes 1 & 6) — only compiled
//! for macOS, since Linux has no introspectable dynamic object-class
//! registry for this pass to walk. Grounded on `LSan::classifyObjC`.

#[cfg(target_os = "macos")]
mod imp {
    use crate::classify::{classify_record_graph, RecordArena};
    use crate::leak_kind::LeakKind;

    #[allow(non_camel_case_types)]
    type Class = *mut std::ffi::c_void;
    #[allow(non_camel_case_types)]
    type Id = *mut std::ffi::c_void;

    extern "C" {
        fn objc_getClassList(buffer: *mut Class, buffer_count: i32) -> i32;
        fn object_getClass(object: Id) -> Class;
    }

    /// The low 48 bits of a `class_rw_t*`/`class_data_bits_t` word, masking
    /// off the tag bits Apple's runtime packs alongside the pointer.
    const DATA_PTR_MASK: usize = 0x0f00_7fff_ffff_fff8;
    /// The low 48 bits of a cache pointer on arm64e/x86_64 runtimes.
    const CACHE_PTR_MASK: usize = (1usize << 48) - 1;

    pub fn classify_runtime_roots(arena: &mut RecordArena, roots: &mut Vec<usize>) {
        unsafe {
            let count = objc_getClassList(std::ptr::null_mut(), 0);
            if count <= 0 {
                return;
            }
            let mut classes = vec![std::ptr::null_mut(); count as usize];
            objc_getClassList(classes.as_mut_ptr(), count);
            for class in classes {
                classify_class(arena, class, roots);
                classify_class(arena, object_getClass(class as Id), roots);
            }
        }
    }

    /// Walks one `Class`'s layout — `[isa, superclass, cache, data, ...]` —
    /// following the cache and class-data pointers (and the `rw_t`'s own
    /// method-list pointers) into the allocation graph.
    unsafe fn classify_class(arena: &mut RecordArena, class: Class, roots: &mut Vec<usize>) {
        if class.is_null() {
            return;
        }
        let words = class as *const usize;

        let cache_ptr = unsafe { *words.add(2) } & CACHE_PTR_MASK;
        if let Some(idx) = arena.find_with_specials(cache_ptr) {
            claim(arena, idx, roots);
        }

        let data_ptr = unsafe { *words.add(4) } & DATA_PTR_MASK;
        let Some(rw_idx) = arena.find_with_specials(data_ptr) else {
            return;
        };
        claim(arena, rw_idx, roots);

        let (rw_ptr, rw_size) = {
            let record = arena.get(rw_idx);
            (record.pointer(), record.size())
        };
        let word = std::mem::size_of::<usize>();
        if rw_size < 4 * word {
            return;
        }
        let rw_words = rw_ptr as *const usize;
        for i in 1..4 {
            let tagged = unsafe { *rw_words.add(i) };
            let untagged = tagged & !0b11usize;
            if let Some(idx) = arena.find_with_specials(untagged) {
                claim(arena, idx, roots);
            }
        }
    }

    fn claim(arena: &mut RecordArena, idx: usize, roots: &mut Vec<usize>) {
        let current = arena.get(idx).leak_kind;
        if LeakKind::should_replace(current, LeakKind::RuntimeDirect, false) {
            arena.get_mut(idx).leak_kind = LeakKind::RuntimeDirect;
            roots.push(idx);
            unsafe { classify_record_graph(arena, idx, LeakKind::RuntimeIndirect, false) };
        }
    }

    /// The Cocoa per-thread dictionary pass (`LSan`'s `CFDictionaryRef`
    /// walk) needs CoreFoundation bindings this workspace's stack doesn't
    /// carry; left a documented no-op instead of a half-built CF shim.
    pub fn classify_runtime_tls(_arena: &mut RecordArena, _roots: &mut Vec<usize>) {}
}

#[cfg(target_os = "macos")]
pub use imp::{classify_runtime_roots, classify_runtime_tls};

#[cfg(not(target_os = "macos"))]
pub fn classify_runtime_roots(_arena: &mut crate::classify::RecordArena, _roots: &mut Vec<usize>) {}

#[cfg(not(target_os = "macos"))]
pub fn classify_runtime_tls(_arena: &mut crate::classify::RecordArena, _roots: &mut Vec<usize>) {}
