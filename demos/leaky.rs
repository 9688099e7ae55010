//! A small program exercising every leak shape this sanitizer classifies:
//! one genuinely lost allocation, one reachable from a global, and one kept
//! alive on purpose as a thread-local value. Not built by this workspace's
//! `Cargo.toml` — it has no interposer of its own. Build it separately and
//! run it with the library preloaded:
//!
//! ```sh
//! rustc demos/leaky.rs -o /tmp/leaky
//! LD_PRELOAD=target/release/libleaksentinel.so /tmp/leaky        # Linux
//! DYLD_INSERT_LIBRARIES=target/release/libleaksentinel.dylib /tmp/leaky  # macOS
//! ```

use std::cell::RefCell;
use std::sync::Mutex;

/// A process-lifetime global: anything still reachable through this at exit
/// is a `global` leak, not a `lost` one.
static KEPT_ALIVE: Mutex<Vec<*mut u8>> = Mutex::new(Vec::new());

thread_local! {
    /// Anything still reachable through this at exit is a
    /// `thread-local value` leak.
    static KEPT_PER_THREAD: RefCell<Vec<*mut u8>> = const { RefCell::new(Vec::new()) };
}

fn leak_and_forget() {
    // Allocated, then every pointer to it goes out of scope — nothing in
    // the process can reach it again, so it is classified `lost`.
    let forgotten = Box::new([0u8; 256]);
    std::mem::forget(forgotten);
}

fn leak_into_global() {
    let reachable = Box::new([1u8; 128]);
    let raw = Box::into_raw(reachable) as *mut u8;
    KEPT_ALIVE.lock().unwrap().push(raw);
}

fn leak_into_thread_local() {
    let reachable = Box::new([2u8; 64]);
    let raw = Box::into_raw(reachable) as *mut u8;
    KEPT_PER_THREAD.with(|cell| cell.borrow_mut().push(raw));
}

fn main() {
    leak_and_forget();
    leak_into_global();
    leak_into_thread_local();

    let worker = std::thread::spawn(|| {
        leak_into_thread_local();
        leak_and_forget();
    });
    worker.join().unwrap();

    // A normal allocation that is properly freed before exit — does not
    // appear in the report at all.
    let scoped = Box::new([3u8; 32]);
    drop(scoped);

    std::process::exit(0);
}
