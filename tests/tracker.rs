//! The per-thread/global tracker's cross-thread fallback (§4.C4/§4.C5):
//! a pointer allocated on one thread and freed on another must still be
//! found through the global tracker's registry of other threads' trackers.

use leaksentinel::callstack::CallStack;
use leaksentinel::record::AllocationRecord;
use leaksentinel::tracker::thread_tracker::with_current;
use leaksentinel::tracker::Tracker;

#[test]
fn a_pointer_allocated_on_one_thread_is_freed_on_another() {
    // A pointer value unlikely to collide with anything else the test
    // binary has actually allocated — only ever used as a tracker key here,
    // never dereferenced.
    let pointer = 0x4000_0000_usize;

    let allocating = std::thread::spawn(move || {
        with_current(|tracker| {
            tracker.record_alloc(AllocationRecord::new(pointer, 64, 1, CallStack::capture(4)));
        });
    });
    allocating.join().unwrap();

    let freeing = std::thread::spawn(move || {
        with_current(|tracker| {
            let (found, record) = tracker.try_remove(pointer);
            assert!(found, "the allocating thread's tracker is gone but the record must have been absorbed by the global tracker");
            let record = record.expect("a found removal must carry the record");
            assert_eq!(record.pointer(), pointer);
            assert_eq!(record.size(), 64);

            // A second removal of the same pointer must not be found again.
            let (found_again, _) = tracker.try_remove(pointer);
            assert!(!found_again, "a pointer must not be removable twice");
        });
    });
    freeing.join().unwrap();
}

#[test]
fn maybe_remove_never_consults_other_trackers() {
    let pointer = 0x4000_1000_usize;

    let allocating = std::thread::spawn(move || {
        with_current(|tracker| {
            tracker.record_alloc(AllocationRecord::new(pointer, 32, 1, CallStack::capture(4)));
        });
    });
    allocating.join().unwrap();

    let checking = std::thread::spawn(move || {
        with_current(|tracker| {
            let (found, _) = tracker.maybe_remove(pointer);
            assert!(!found, "maybe_remove must only ever see this thread's own records");
        });
    });
    checking.join().unwrap();
}

#[test]
fn remove_from_others_picks_the_most_recently_deleted_diagnostic_across_trackers() {
    use std::sync::mpsc::channel;

    let pointer = 0x4000_4000_usize;
    let (release_a, wait_a) = channel::<()>();
    let (done_a, a_ready) = channel::<()>();
    let (release_b, wait_b) = channel::<()>();
    let (done_b, b_ready) = channel::<()>();

    // Thread A allocates, frees (size 8), then parks alive so its tracker
    // stays registered while the test inspects the global fallback.
    let a = std::thread::spawn(move || {
        with_current(|tracker| {
            tracker.record_alloc(AllocationRecord::new(pointer, 8, 1, CallStack::capture(4)));
            let (found, _) = tracker.try_remove(pointer);
            assert!(found);
            done_a.send(()).unwrap();
            wait_a.recv().unwrap();
        });
    });
    a_ready.recv().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(2));

    // Thread B reuses the same pointer value (size 24, distinguishable from
    // A's), deletes it strictly after A, and also parks alive.
    let b = std::thread::spawn(move || {
        with_current(|tracker| {
            tracker.record_alloc(AllocationRecord::new(pointer, 24, 2, CallStack::capture(4)));
            let (found, _) = tracker.try_remove(pointer);
            assert!(found);
            done_b.send(()).unwrap();
            wait_b.recv().unwrap();
        });
    });
    b_ready.recv().unwrap();

    // Both trackers are still registered and both hold a deleted tombstone
    // for `pointer`; the fallback must not stop at the first one it finds
    // (A's, size 8) but pick the one deleted most recently (B's, size 24).
    let (found, diagnostic) = leaksentinel::tracker::global::instance().remove_from_others(u64::MAX, pointer);
    assert!(!found, "both trackers already deleted this pointer");
    let diagnostic = diagnostic.expect("a double free across trackers must surface a diagnostic");
    assert_eq!(diagnostic.size(), 24, "thread B's more recent tombstone must win over thread A's stale one");

    release_a.send(()).unwrap();
    release_b.send(()).unwrap();
    a.join().unwrap();
    b.join().unwrap();
}

#[test]
fn change_replaces_a_record_registered_on_another_thread() {
    let pointer = 0x4000_2000_usize;

    let allocating = std::thread::spawn(move || {
        with_current(|tracker| {
            tracker.record_alloc(AllocationRecord::new(pointer, 16, 1, CallStack::capture(4)));
        });
    });
    allocating.join().unwrap();

    let resizing = std::thread::spawn(move || {
        with_current(|tracker| {
            tracker.change(AllocationRecord::new(pointer, 256, 2, CallStack::capture(4)));
        });
    });
    resizing.join().unwrap();

    let verifying = std::thread::spawn(move || {
        with_current(|tracker| {
            let (found, record) = tracker.try_remove(pointer);
            assert!(found);
            assert_eq!(record.unwrap().size(), 256, "change must have replaced the record in place");
        });
    });
    verifying.join().unwrap();
}
