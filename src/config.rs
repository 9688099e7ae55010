//! The configuration collaborator (§6.2).
//!
//! Deliberately thin: this reads a handful of well-known `LSAN_*`
//! environment variables into a plain struct. Parsing env vars in general is
//! out of this crate's scope (see `SPEC_FULL.md` §1) — this is the minimal
//! concrete stand-in needed so the rest of the core has something to read
//! accessors from.

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

fn get_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => match v.to_lowercase().as_str() {
            "true" => true,
            "false" => false,
            other => other.parse::<i64>().map(|n| n != 0).unwrap_or(default),
        },
        Err(_) => default,
    }
}

fn get_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_paths(name: &str) -> Vec<PathBuf> {
    env::var(name)
        .ok()
        .map(|v| v.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect())
        .unwrap_or_default()
}

fn get_duration_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Accessors an interposer, tracker, classifier, or reporter may consult.
///
/// Mirrors the distilled spec's §6.2 contract: "Consumed as an object whose
/// accessors supply, at minimum: ...".
#[derive(Debug, Clone)]
pub struct Config {
    pub stats_active: bool,
    pub callstack_depth_cap: usize,
    pub invalid_free_crash: bool,
    pub invalid_free_warn: bool,
    /// Whether a freed record is retained (marked `deleted` rather than
    /// erased) so a later double-free has a diagnostic record to point at
    /// (§3 `PerThreadTracker` lifecycle, §4.C4 `try_remove`). Distinct from
    /// `invalid_free_warn`/`invalid_free_crash`, which govern what happens
    /// when an *unknown* pointer is freed rather than whether a known one's
    /// record survives its own release.
    pub invalid_free_tracking: bool,
    pub free_null_warn: bool,
    pub zero_size_warn: bool,
    pub show_indirects: bool,
    pub show_reachables: bool,
    pub print_exit_point: bool,
    pub relative_paths: bool,
    pub suppression_files: Vec<PathBuf>,
    pub system_library_files: Vec<PathBuf>,
    /// Stored for completeness of the accessor surface; no auto-stats timer
    /// is scheduled anywhere in this crate (Non-goal, SPEC_FULL.md §1).
    pub auto_stats_interval: Option<Duration>,
    pub human_print: bool,
    pub print_formatted: bool,
    pub print_cout: bool,
    pub suppression_developer_mode: bool,
    pub leak_count_cap: usize,
    pub first_party_threshold: usize,
    pub first_party_regex: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stats_active: false,
            callstack_depth_cap: 20,
            invalid_free_crash: true,
            invalid_free_warn: false,
            invalid_free_tracking: true,
            free_null_warn: false,
            zero_size_warn: false,
            show_indirects: false,
            show_reachables: true,
            print_exit_point: false,
            relative_paths: true,
            suppression_files: Vec::new(),
            system_library_files: Vec::new(),
            auto_stats_interval: None,
            human_print: true,
            print_formatted: true,
            print_cout: false,
            suppression_developer_mode: false,
            leak_count_cap: 100,
            first_party_threshold: 3,
            first_party_regex: None,
        }
    }
}

impl Config {
    /// Builds a [`Config`] from the process environment, falling back to
    /// [`Config::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            stats_active: get_bool("LSAN_STATS_ACTIVE", default.stats_active),
            callstack_depth_cap: get_usize("LSAN_CALLSTACK_SIZE", default.callstack_depth_cap),
            invalid_free_crash: get_bool("LSAN_INVALID_CRASH", default.invalid_free_crash),
            invalid_free_warn: get_bool("LSAN_INVALID_FREE", default.invalid_free_warn),
            invalid_free_tracking: get_bool("LSAN_INVALID_FREE_TRACKING", default.invalid_free_tracking),
            free_null_warn: get_bool("LSAN_FREE_NULL", default.free_null_warn),
            zero_size_warn: get_bool("LSAN_ZERO_ALLOCATION", default.zero_size_warn),
            show_indirects: get_bool("LSAN_INDIRECT_LEAKS", default.show_indirects),
            show_reachables: get_bool("LSAN_REACHABLE_LEAKS", default.show_reachables),
            print_exit_point: get_bool("LSAN_PRINT_EXIT_POINT", default.print_exit_point),
            relative_paths: get_bool("LSAN_RELATIVE_PATHS", default.relative_paths),
            suppression_files: get_paths("LSAN_SUPPRESSION_FILES"),
            system_library_files: get_paths("LSAN_SYSTEM_LIBRARY_FILES"),
            auto_stats_interval: get_duration_millis("LSAN_AUTO_STATS"),
            human_print: get_bool("LSAN_HUMAN_PRINT", default.human_print),
            print_formatted: get_bool("LSAN_PRINT_FORMATTED", default.print_formatted),
            print_cout: get_bool("LSAN_PRINT_COUT", default.print_cout),
            suppression_developer_mode: get_bool("LSAN_SUPPRESSION_DEVELOPER", default.suppression_developer_mode),
            leak_count_cap: get_usize("LSAN_LEAK_COUNT", default.leak_count_cap),
            first_party_threshold: get_usize("LSAN_FIRST_PARTY_THRESHOLD", default.first_party_threshold),
            first_party_regex: env::var("LSAN_FIRST_PARTY_REGEX").ok(),
        }
    }
}

static GLOBAL: OnceLock<Config> = OnceLock::new();

/// The process-wide configuration, read from the environment on first use
/// and cached for the life of the process (§6.2 accessor surface).
pub fn global() -> &'static Config {
    GLOBAL.get_or_init(Config::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.show_reachables);
        assert!(!cfg.show_indirects);
        assert_eq!(cfg.callstack_depth_cap, 20);
    }

    #[test]
    fn paths_split_on_colon_and_ignore_empties() {
        std::env::set_var("LSAN_SUPPRESSION_FILES_TEST", "/a/b:/c/d::");
        let parsed = get_paths("LSAN_SUPPRESSION_FILES_TEST");
        assert_eq!(parsed, vec![PathBuf::from("/a/b"), PathBuf::from("/c/d")]);
        std::env::remove_var("LSAN_SUPPRESSION_FILES_TEST");
    }

    #[test]
    fn bool_accepts_numeric_fallback() {
        std::env::set_var("LSAN_BOOL_TEST", "0");
        assert!(!get_bool("LSAN_BOOL_TEST", true));
        std::env::set_var("LSAN_BOOL_TEST", "1");
        assert!(get_bool("LSAN_BOOL_TEST", false));
        std::env::remove_var("LSAN_BOOL_TEST");
    }
}
