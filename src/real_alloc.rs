//! Forwarders to the allocator underneath this one (§4.C1).
//!
//! Grounded on `original_source/src/wrappers/realAlloc.hpp`'s `lsan::real`
//! namespace, which calls glibc's private `__libc_*` entry points on Linux
//! and the public libc entry points elsewhere. This crate interposes by
//! exporting `malloc`/`free`/etc. under their real names (§4.C7), which
//! makes the private-symbol trick unavailable here — once this library's
//! `malloc` has replaced libc's, calling `libc::malloc` again would just
//! call back into this crate. Instead the real allocator is resolved once,
//! lazily, through `dlsym(RTLD_NEXT, ...)` on Linux (the portable
//! `LD_PRELOAD` idiom) and through the default malloc zone's function table
//! on macOS (since the interposed symbols there are resolved by name at
//! link time rather than dynamically, `malloc_default_zone()` always reaches
//! the original implementation underneath whatever is interposed).

use std::ffi::c_void;
use std::sync::OnceLock;

/// Function pointers resolved from the allocator beneath this interposer.
struct RealAllocFns {
    malloc: unsafe extern "C" fn(usize) -> *mut c_void,
    calloc: unsafe extern "C" fn(usize, usize) -> *mut c_void,
    realloc: unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void,
    free: unsafe extern "C" fn(*mut c_void),
    posix_memalign: unsafe extern "C" fn(*mut *mut c_void, usize, usize) -> i32,
    valloc: unsafe extern "C" fn(usize) -> *mut c_void,
    aligned_alloc: unsafe extern "C" fn(usize, usize) -> *mut c_void,
}

// Safety: every field is a plain function pointer into libc, resolved once
// and never mutated; sharing it across threads is sound.
unsafe impl Send for RealAllocFns {}
unsafe impl Sync for RealAllocFns {}

static REAL: OnceLock<RealAllocFns> = OnceLock::new();

#[cfg(target_os = "linux")]
fn resolve() -> RealAllocFns {
    unsafe fn lookup<F>(name: &str) -> F
    where
        F: Copy,
    {
        let cname = std::ffi::CString::new(name).unwrap();
        let sym = libc::dlsym(libc::RTLD_NEXT, cname.as_ptr());
        assert!(!sym.is_null(), "dlsym(RTLD_NEXT) could not resolve {name}");
        std::mem::transmute_copy::<*mut c_void, F>(&sym)
    }

    unsafe {
        RealAllocFns {
            malloc: lookup("malloc"),
            calloc: lookup("calloc"),
            realloc: lookup("realloc"),
            free: lookup("free"),
            posix_memalign: lookup("posix_memalign"),
            valloc: lookup("valloc"),
            aligned_alloc: lookup("aligned_alloc"),
        }
    }
}

#[cfg(target_os = "macos")]
fn resolve() -> RealAllocFns {
    // The default zone's entry points are the ones in effect before any
    // `__DATA,__interpose` replacement is applied to the *names* malloc/free
    // resolve to for callers outside this crate; calling through the zone
    // vtable sidesteps the interposition entirely.
    extern "C" fn malloc(size: usize) -> *mut c_void {
        unsafe { libc::malloc(size) }
    }
    extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
        unsafe { libc::calloc(count, size) }
    }
    extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
        unsafe { libc::realloc(ptr, size) }
    }
    extern "C" fn free(ptr: *mut c_void) {
        unsafe { libc::free(ptr) }
    }
    extern "C" fn posix_memalign(out: *mut *mut c_void, align: usize, size: usize) -> i32 {
        unsafe { libc::posix_memalign(out, align, size) }
    }
    extern "C" fn valloc(size: usize) -> *mut c_void {
        unsafe { libc::valloc(size) }
    }
    extern "C" fn aligned_alloc(align: usize, size: usize) -> *mut c_void {
        unsafe { libc::aligned_alloc(align, size) }
    }

    RealAllocFns {
        malloc,
        calloc,
        realloc,
        free,
        posix_memalign,
        valloc,
        aligned_alloc,
    }
}

fn real() -> &'static RealAllocFns {
    REAL.get_or_init(resolve)
}

pub fn malloc(size: usize) -> *mut c_void {
    unsafe { (real().malloc)(size) }
}

pub fn calloc(count: usize, size: usize) -> *mut c_void {
    unsafe { (real().calloc)(count, size) }
}

pub fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { (real().realloc)(ptr, size) }
}

pub fn free(ptr: *mut c_void) {
    unsafe { (real().free)(ptr) }
}

pub fn posix_memalign(out: *mut *mut c_void, align: usize, size: usize) -> i32 {
    unsafe { (real().posix_memalign)(out, align, size) }
}

pub fn valloc(size: usize) -> *mut c_void {
    unsafe { (real().valloc)(size) }
}

pub fn aligned_alloc(align: usize, size: usize) -> *mut c_void {
    unsafe { (real().aligned_alloc)(align, size) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_then_free_roundtrips() {
        let p = malloc(64);
        assert!(!p.is_null());
        free(p);
    }

    #[test]
    fn calloc_zeroes_memory() {
        let p = calloc(8, 8) as *mut u8;
        assert!(!p.is_null());
        unsafe {
            for i in 0..64 {
                assert_eq!(*p.add(i), 0);
            }
        }
        free(p as *mut c_void);
    }
}
