//! macOS interposition surface: `malloc_zone_t` vtable replacements plus the
//! Mach-O `__DATA,__interpose` section convention for the handful of
//! top-level libc symbols the zone vtable doesn't cover (`exit`).
//!
//! Grounded on the original's `lsan::zoneAllocator`: rather than replacing
//! `malloc`/`free`/etc. by name (macOS's linker resolves those directly to
//! `libmalloc`'s default zone, and name-based interposition of allocator
//! entry points is unreliable once other zones exist), this installs a
//! custom `malloc_zone_t` whose function pointers are this crate's tracked
//! variants, wrapping the default zone's original vtable for every call
//! that isn't itself a leak-tracking concern (size introspection, batch
//! operations, zone introspection).

use std::ffi::c_void;
use std::os::raw::{c_int, c_uint};

use super::{check_alignment, tracked_alloc, tracked_free, tracked_realloc};

#[repr(C)]
struct MallocIntrospectionT {
    _opaque: [u8; 0],
}

/// A byte-for-byte stand-in for libmalloc's `malloc_zone_t` header — only
/// the function-pointer slots this crate actually replaces are named;
/// everything after `batch_free` is forwarded untouched via
/// `underlying_zone`, so its exact tail layout never needs to be modelled.
#[repr(C)]
struct MallocZoneT {
    reserved1: *mut c_void,
    reserved2: *mut c_void,
    size: extern "C" fn(*mut MallocZoneT, *const c_void) -> usize,
    malloc: extern "C" fn(*mut MallocZoneT, usize) -> *mut c_void,
    calloc: extern "C" fn(*mut MallocZoneT, usize, usize) -> *mut c_void,
    valloc: extern "C" fn(*mut MallocZoneT, usize) -> *mut c_void,
    free: extern "C" fn(*mut MallocZoneT, *mut c_void),
    realloc: extern "C" fn(*mut MallocZoneT, *mut c_void, usize) -> *mut c_void,
    destroy: extern "C" fn(*mut MallocZoneT),
    zone_name: *const i8,
    batch_malloc: extern "C" fn(*mut MallocZoneT, usize, *mut *mut c_void, c_uint) -> c_uint,
    batch_free: extern "C" fn(*mut MallocZoneT, *mut *mut c_void, c_uint),
    introspect: *mut MallocIntrospectionT,
    version: c_uint,
    memalign: extern "C" fn(*mut MallocZoneT, usize, usize) -> *mut c_void,
    free_definite_size: extern "C" fn(*mut MallocZoneT, *mut c_void, usize),
    pressure_relief: extern "C" fn(*mut MallocZoneT, usize) -> usize,
}

unsafe fn underlying_zone() -> *mut MallocZoneT {
    extern "C" {
        fn malloc_default_zone() -> *mut MallocZoneT;
    }
    malloc_default_zone()
}

extern "C" fn zone_size(zone: *mut MallocZoneT, ptr: *const c_void) -> usize {
    unsafe { ((*underlying_zone()).size)(zone, ptr) }
}

extern "C" fn zone_malloc(zone: *mut MallocZoneT, size: usize) -> *mut c_void {
    tracked_alloc(size, || unsafe { ((*underlying_zone()).malloc)(zone, size) })
}

extern "C" fn zone_calloc(zone: *mut MallocZoneT, count: usize, size: usize) -> *mut c_void {
    tracked_alloc(count.saturating_mul(size), || unsafe {
        ((*underlying_zone()).calloc)(zone, count, size)
    })
}

extern "C" fn zone_valloc(zone: *mut MallocZoneT, size: usize) -> *mut c_void {
    tracked_alloc(size, || unsafe { ((*underlying_zone()).valloc)(zone, size) })
}

extern "C" fn zone_free(zone: *mut MallocZoneT, ptr: *mut c_void) {
    tracked_free(ptr);
    unsafe { ((*underlying_zone()).free)(zone, ptr) }
}

extern "C" fn zone_realloc(zone: *mut MallocZoneT, ptr: *mut c_void, size: usize) -> *mut c_void {
    tracked_realloc(ptr, size, || unsafe { ((*underlying_zone()).realloc)(zone, ptr, size) })
}

/// Forwards zone teardown to the real zone destructor. A full zone-scoped
/// teardown would first enumerate every allocation this zone still owns and
/// free its tracking record, so the memory going away with the zone never
/// surfaces as a leak — but that enumeration rides on `introspect`'s
/// `enumerator` callback, which this crate treats as opaque (`introspect`
/// is forwarded from the underlying zone unread, never called). In
/// practice this zone only ever replaces the process's one default zone,
/// which is never itself destroyed before process exit, so the gap is
/// unreachable rather than merely unhandled.
extern "C" fn zone_destroy(zone: *mut MallocZoneT) {
    unsafe { ((*underlying_zone()).destroy)(zone) }
}

extern "C" fn zone_memalign(zone: *mut MallocZoneT, alignment: usize, size: usize) -> *mut c_void {
    check_alignment(alignment);
    tracked_alloc(size, || unsafe { ((*underlying_zone()).memalign)(zone, alignment, size) })
}

extern "C" fn zone_free_definite_size(zone: *mut MallocZoneT, ptr: *mut c_void, size: usize) {
    tracked_free(ptr);
    unsafe { ((*underlying_zone()).free_definite_size)(zone, ptr, size) }
}

extern "C" fn zone_pressure_relief(zone: *mut MallocZoneT, goal: usize) -> usize {
    unsafe { ((*underlying_zone()).pressure_relief)(zone, goal) }
}

extern "C" fn zone_batch_malloc(
    zone: *mut MallocZoneT,
    size: usize,
    results: *mut *mut c_void,
    count: c_uint,
) -> c_uint {
    let filled = unsafe { ((*underlying_zone()).batch_malloc)(zone, size, results, count) };
    for i in 0..filled as isize {
        let ptr = unsafe { *results.offset(i) };
        tracked_alloc(size, || ptr);
    }
    filled
}

extern "C" fn zone_batch_free(zone: *mut MallocZoneT, pointers: *mut *mut c_void, count: c_uint) {
    for i in 0..count as isize {
        let ptr = unsafe { *pointers.offset(i) };
        tracked_free(ptr);
    }
    unsafe { ((*underlying_zone()).batch_free)(zone, pointers, count) }
}

#[repr(C)]
struct InterposeEntry {
    replacement: *const c_void,
    original: *const c_void,
}

unsafe impl Sync for InterposeEntry {}

extern "C" {
    fn exit(status: c_int) -> !;
}

extern "C" fn interposed_exit(status: c_int) -> ! {
    crate::run_exit_hook();
    unsafe { exit(status) }
}

#[link_section = "__DATA,__interpose"]
#[used]
static EXIT_INTERPOSE: InterposeEntry = InterposeEntry {
    replacement: interposed_exit as *const c_void,
    original: exit as *const c_void,
};

/// Installs a tracked `malloc_zone_t` as the default zone, leaving the
/// platform's original zone in place underneath as `underlying_zone`'s
/// target (§4.C7). Called once from process-startup initialisation.
pub fn install_zone() {
    extern "C" {
        fn malloc_zone_register(zone: *mut MallocZoneT);
        fn malloc_set_zone_name(zone: *mut MallocZoneT, name: *const i8);
    }

    unsafe {
        let underlying = underlying_zone();
        let zone = Box::new(MallocZoneT {
            reserved1: std::ptr::null_mut(),
            reserved2: std::ptr::null_mut(),
            size: zone_size,
            malloc: zone_malloc,
            calloc: zone_calloc,
            valloc: zone_valloc,
            free: zone_free,
            realloc: zone_realloc,
            destroy: zone_destroy,
            zone_name: std::ptr::null(),
            batch_malloc: zone_batch_malloc,
            batch_free: zone_batch_free,
            introspect: (*underlying).introspect,
            version: (*underlying).version,
            memalign: zone_memalign,
            free_definite_size: zone_free_definite_size,
            pressure_relief: zone_pressure_relief,
        });
        let leaked = Box::into_raw(zone);
        let name = std::ffi::CString::new("leaksentinel").unwrap();
        malloc_set_zone_name(leaked, name.as_ptr());
        malloc_zone_register(leaked);
    }
}
