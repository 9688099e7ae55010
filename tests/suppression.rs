//! The declarative suppression list, exercised through
//! `classify_and_render` end-to-end rather than against
//! `SuppressionEngine` directly, since matching depends on the allocation's
//! resolved leak kind and call stack the same way production does.

use std::io::Write;

use leaksentinel::callstack::CallStack;
use leaksentinel::classify_and_render;
use leaksentinel::config::Config;
use leaksentinel::record::AllocationRecord;
use leaksentinel::thread_registry::ThreadRegistry;

fn registry_for_this_thread() -> ThreadRegistry {
    let registry = ThreadRegistry::new();
    registry.register_current_thread(1);
    registry
}

fn write_suppression_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp suppression file");
    file.write_all(contents.as_bytes()).expect("write suppression file");
    file.flush().expect("flush suppression file");
    file
}

#[test]
fn matching_suppression_hides_the_leak_entirely() {
    // Matches on exact size plus a frame list whose library regex accepts
    // any image (`.*`) at any position — this allocation's call stack
    // always resolves to at least one frame, wherever these tests run from.
    let suppression_json = r#"{
        "name": "synthetic-size-match",
        "size": 48,
        "functions": [{"libraryRegex": ".*"}]
    }"#;
    let file = write_suppression_file(suppression_json);

    let mut config = Config::default();
    config.suppression_files = vec![file.path().to_path_buf()];

    let leaked = Box::leak(Box::new([0u8; 48]));
    let record = AllocationRecord::new(leaked.as_ptr() as usize, leaked.len(), 1, CallStack::capture(4));

    let registry = registry_for_this_thread();
    let (report, stats) = classify_and_render(vec![record], &registry, &config);

    assert_eq!(stats.total(), 0, "a suppressed record must not be counted as any leak kind");
    assert_eq!(stats.tls, 0, "a general suppression hides the record, it does not reclassify it");
    assert!(!report.contains("leaked at"), "report was:\n{report}");
}

#[test]
fn non_matching_suppression_leaves_the_leak_alone() {
    let suppression_json = r#"{
        "name": "wrong-size",
        "size": 9999,
        "functions": [{"libraryRegex": ".*"}]
    }"#;
    let file = write_suppression_file(suppression_json);

    let mut config = Config::default();
    config.suppression_files = vec![file.path().to_path_buf()];

    let leaked = Box::leak(Box::new([0u8; 48]));
    let record = AllocationRecord::new(leaked.as_ptr() as usize, leaked.len(), 1, CallStack::capture(4));

    let registry = registry_for_this_thread();
    let (_report, stats) = classify_and_render(vec![record], &registry, &config);

    assert_eq!(stats.total(), 1, "the allocation must still classify as exactly one leak");
    assert_eq!(stats.tls, 0, "a non-matching suppression must not reclassify it as thread-local");
}

#[test]
fn malformed_suppression_file_is_skipped_without_aborting_the_load() {
    let file = write_suppression_file("{ this is not valid json");

    let mut config = Config::default();
    config.suppression_files = vec![file.path().to_path_buf()];

    let leaked = Box::leak(Box::new([0u8; 48]));
    let record = AllocationRecord::new(leaked.as_ptr() as usize, leaked.len(), 1, CallStack::capture(4));

    let registry = registry_for_this_thread();
    // Must not panic despite the unreadable suppression file; the built-in
    // defaults still load and the allocation still classifies.
    let (_report, stats) = classify_and_render(vec![record], &registry, &config);
    assert_eq!(stats.total(), 1);
}
