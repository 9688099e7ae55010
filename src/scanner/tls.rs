//! Thread-control-block size probing for the thread-local pass (§4.C8).
//!
//! Grounded on `LSan::gatherPthreadSize`: Linux's glibc exposes no API for
//! the TCB size, so it is derived once — by spawning a one-shot helper
//! thread and computing `stackTop - pthread_self()` — and cached for the
//! process's lifetime. This is exactly the "fragile, glibc-version-
//! dependent" probe the distillation's Open Questions flag; it is not
//! guaranteed stable across glibc releases, same as the original.

use std::sync::OnceLock;

#[cfg(target_os = "linux")]
pub fn thread_control_block_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| {
        std::thread::spawn(probe_from_helper_thread)
            .join()
            .unwrap_or(4096)
    })
}

#[cfg(target_os = "linux")]
fn probe_from_helper_thread() -> usize {
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
            return 4096;
        }
        let mut stack_addr: *mut std::ffi::c_void = std::ptr::null_mut();
        let mut stack_size: usize = 0;
        libc::pthread_attr_getstack(&attr, &mut stack_addr, &mut stack_size);
        libc::pthread_attr_destroy(&mut attr);
        let top = (stack_addr as usize).saturating_add(stack_size);
        let self_addr = libc::pthread_self() as usize;
        top.saturating_sub(self_addr)
    }
}

/// `__PTHREAD_SIZE__` on Apple's libpthread — a stable ABI constant there,
/// unlike glibc's opaque layout, so no runtime probe is needed.
#[cfg(target_os = "macos")]
const MACOS_PTHREAD_SIZE: usize = 8176;

#[cfg(target_os = "macos")]
pub fn thread_control_block_size() -> usize {
    MACOS_PTHREAD_SIZE
}

/// The `[begin, end)` window of a thread's control block actually worth
/// scanning: the original restricts the Linux pass to a window near the top
/// of the TCB (`end - 3744`) rather than the whole block, since glibc's TCB
/// holds plenty of non-pointer bookkeeping that would otherwise flood the
/// scan with false roots.
pub fn tcb_bounds(pthread_addr: usize, tcb_size: usize) -> (usize, usize) {
    let word = std::mem::size_of::<usize>();
    let end = crate::classify::align_down(pthread_addr + tcb_size, word);
    #[cfg(target_os = "linux")]
    let begin = crate::classify::align_up(end.saturating_sub(3744), word);
    #[cfg(not(target_os = "linux"))]
    let begin = crate::classify::align_up(pthread_addr, word);
    (begin, end)
}
