//! Best-effort function-name → address-range resolution for suppressions
//! (§4.C10).
//!
//! The original walks its own loaded-image symbol tables to recover both an
//! address and a size for a named function. This workspace's ambient stack
//! has no linked symbol-table walker, so this resolver falls back to
//! `dlsym`, which only ever yields an address — every resolved range is
//! therefore zero-length (an exact-address match) unless the suppression
//! entry supplies an explicit `offset`, which is consistent with the file
//! format's own "an offset means a point match" rule (§6.3).

use std::ffi::CString;

pub struct FunctionRange {
    pub begin: usize,
    pub length: usize,
}

/// Resolves `name` to an address via `dlsym`, optionally scoped to the
/// dynamic library named by `library` (loaded with `RTLD_NOLOAD` so this
/// never pulls in a library the process hasn't already linked).
pub fn function_range(name: &str, library: Option<&str>) -> Option<FunctionRange> {
    let handle = match library {
        Some(path) => {
            let cpath = CString::new(path).ok()?;
            unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_NOLOAD | libc::RTLD_LAZY) }
        }
        None => unsafe { libc::dlopen(std::ptr::null(), libc::RTLD_LAZY) },
    };
    if handle.is_null() {
        return None;
    }
    let cname = CString::new(name).ok()?;
    let addr = unsafe { libc::dlsym(handle, cname.as_ptr()) };
    if addr.is_null() {
        return None;
    }
    Some(FunctionRange {
        begin: addr as usize,
        length: 0,
    })
}
