//! Linux interposition surface: `#[no_mangle]` exports under the real
//! symbol names, picked up by the dynamic linker ahead of libc's own when
//! this library is placed in `LD_PRELOAD` (§6.1).

use std::ffi::{c_void, CString};
use std::os::raw::c_int;
use std::sync::OnceLock;

use super::{check_alignment, tracked_alloc, tracked_free, tracked_realloc};

#[no_mangle]
pub extern "C" fn malloc(size: usize) -> *mut c_void {
    tracked_alloc(size, || crate::real_alloc::malloc(size))
}

#[no_mangle]
pub extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
    tracked_alloc(count.saturating_mul(size), || crate::real_alloc::calloc(count, size))
}

#[no_mangle]
pub extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    tracked_realloc(ptr, size, || crate::real_alloc::realloc(ptr, size))
}

#[no_mangle]
pub extern "C" fn free(ptr: *mut c_void) {
    tracked_free(ptr);
    crate::real_alloc::free(ptr);
}

#[no_mangle]
pub extern "C" fn posix_memalign(memptr: *mut *mut c_void, alignment: usize, size: usize) -> c_int {
    check_alignment(alignment);
    let mut out: *mut c_void = std::ptr::null_mut();
    let result = crate::real_alloc::posix_memalign(&mut out, alignment, size);
    if result == 0 {
        tracked_alloc(size, || out);
        unsafe {
            *memptr = out;
        }
    }
    result
}

#[no_mangle]
pub extern "C" fn valloc(size: usize) -> *mut c_void {
    tracked_alloc(size, || crate::real_alloc::valloc(size))
}

#[no_mangle]
pub extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    check_alignment(alignment);
    tracked_alloc(size, || crate::real_alloc::aligned_alloc(alignment, size))
}

type PthreadCreateFn = unsafe extern "C" fn(
    *mut libc::pthread_t,
    *const libc::pthread_attr_t,
    extern "C" fn(*mut c_void) -> *mut c_void,
    *mut c_void,
) -> c_int;

fn real_pthread_create() -> PthreadCreateFn {
    static ADDR: OnceLock<usize> = OnceLock::new();
    let addr = *ADDR.get_or_init(|| unsafe {
        let name = CString::new("pthread_create").unwrap();
        let sym = libc::dlsym(libc::RTLD_NEXT, name.as_ptr());
        assert!(!sym.is_null(), "dlsym(RTLD_NEXT) could not resolve pthread_create");
        sym as usize
    });
    unsafe { std::mem::transmute(addr) }
}

struct TrampolineArgs {
    start_routine: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
}

extern "C" fn trampoline(raw: *mut c_void) -> *mut c_void {
    let args = unsafe { Box::from_raw(raw as *mut TrampolineArgs) };
    // Force this thread's tracker (and thread-registry entry) into
    // existence before the user's start routine runs, so even a thread
    // that never allocates still contributes its stack to the root set
    // (§4.C6/C8).
    crate::tracker::thread_tracker::with_current(|_| {});
    (args.start_routine)(args.arg)
}

/// Wraps every spawned thread's start routine so its tracker (and thus its
/// stack bounds) are registered before user code runs, rather than only on
/// that thread's first allocation.
#[no_mangle]
pub extern "C" fn pthread_create(
    thread: *mut libc::pthread_t,
    attr: *const libc::pthread_attr_t,
    start_routine: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
) -> c_int {
    let boxed = Box::new(TrampolineArgs { start_routine, arg });
    let raw = Box::into_raw(boxed) as *mut c_void;
    unsafe { (real_pthread_create())(thread, attr, trampoline, raw) }
}

type ExitFn = unsafe extern "C" fn(c_int) -> !;

fn real_exit_fn(name: &str) -> ExitFn {
    unsafe {
        let cname = CString::new(name).unwrap();
        let sym = libc::dlsym(libc::RTLD_NEXT, cname.as_ptr());
        assert!(!sym.is_null(), "dlsym(RTLD_NEXT) could not resolve {name}");
        std::mem::transmute::<*mut c_void, ExitFn>(sym)
    }
}

/// Runs the end-of-process classification-and-report pass exactly once
/// before handing off to the real `exit`/`_exit` — classification must run
/// while every other thread can still be stopped and scanned, which is why
/// it happens here rather than in a Rust `Drop` or `atexit` hook that might
/// run after threads have already been torn down.
#[no_mangle]
pub extern "C" fn exit(status: c_int) -> ! {
    crate::run_exit_hook();
    unsafe { (real_exit_fn("exit"))(status) }
}

#[no_mangle]
pub extern "C" fn _exit(status: c_int) -> ! {
    crate::run_exit_hook();
    unsafe { (real_exit_fn("_exit"))(status) }
}
