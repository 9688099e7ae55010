//! The suppression engine (§4.C10), grounded on `Suppression.cpp` and
//! `callstackHelper.cpp`.
//!
//! A suppression matches a leak record on any combination of exact size,
//! leak-kind ordinal, and image-name regex, plus an ordered list of frame
//! matchers tested as a sliding, contiguous window over the allocation call
//! stack — the suppression matches if *any* window position satisfies every
//! matcher in order.

pub mod raw;
pub mod resolve;

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::Config;
use crate::error::{Result, SuppressionError};
use crate::leak_kind::LeakKind;
use crate::record::AllocationRecord;
use crate::scanner::regions::LoadedRegion;

const DEFAULT_SUPPRESSIONS: &str = include_str!("default_suppressions.json");
const DEFAULT_SYSTEM_LIBRARIES: &str = include_str!("default_system_libraries.json");

/// One matcher within a suppression's ordered frame list.
#[derive(Debug, Clone)]
pub enum FrameMatcher {
    /// A resolved function's `[begin, begin+length]` address range; `length
    /// == 0` is an exact-address point match (§6.3 "an offset yields a
    /// zero-length range").
    Range { begin: usize, length: usize },
    /// Matches purely on the owning image's path, ignoring the address.
    LibraryRegex(Vec<Regex>),
}

impl FrameMatcher {
    fn matches(&self, frame_address: usize, frame_image: &str) -> bool {
        match self {
            FrameMatcher::Range { begin, length } => {
                if *length == 0 {
                    frame_address == *begin
                } else {
                    frame_address >= *begin && frame_address <= begin.saturating_add(*length)
                }
            }
            FrameMatcher::LibraryRegex(regexes) => regexes.iter().any(|re| re.is_match(frame_image)),
        }
    }
}

/// One loaded, matchable suppression entry.
#[derive(Debug, Clone)]
pub struct Suppression {
    pub name: String,
    size: Option<u64>,
    leak_kind: Option<LeakKind>,
    image_name: Option<Regex>,
    frames: Vec<FrameMatcher>,
}

impl Suppression {
    /// The leak kind this entry's `"type"` field constrains on, if any — used
    /// by the Pass 5 TLS-reclassification rule (§4.C8) to tell a
    /// TLS-specific suppression apart from a general one.
    pub fn leak_kind(&self) -> Option<LeakKind> {
        self.leak_kind
    }

    /// Whether `record` is suppressed by this entry, consulting `regions`
    /// to resolve each call-stack address back to its owning image for the
    /// `libraryRegex` frame matchers.
    pub fn matches(&self, record: &AllocationRecord, regions: &[LoadedRegion]) -> bool {
        if let Some(size) = self.size {
            if record.size() as u64 != size {
                return false;
            }
        }
        if let Some(kind) = self.leak_kind {
            if record.leak_kind != kind {
                return false;
            }
        }
        if let Some(re) = &self.image_name {
            match &record.image_name {
                Some(name) if re.is_match(name) => {}
                _ => return false,
            }
        }

        if self.frames.is_empty() {
            // §4.C10: no frame list is only a match if the suppression
            // actually constrained on something else.
            return self.size.is_some() || self.leak_kind.is_some() || self.image_name.is_some();
        }

        let addresses = record.allocation_stack().raw_addresses();
        if addresses.len() < self.frames.len() {
            return false;
        }
        'window: for start in 0..=(addresses.len() - self.frames.len()) {
            for (offset, matcher) in self.frames.iter().enumerate() {
                let address = addresses[start + offset] as usize;
                let image = image_for_address(address, regions);
                if !matcher.matches(address, image) {
                    continue 'window;
                }
            }
            return true;
        }
        false
    }
}

fn image_for_address<'a>(address: usize, regions: &'a [LoadedRegion]) -> &'a str {
    regions
        .iter()
        .find(|r| r.region.contains(address))
        .map(|r| r.absolute_name.as_str())
        .unwrap_or("")
}

/// The loaded set of declarative suppressions plus the independent
/// first-party ("system library") regex list (§4.C10).
pub struct SuppressionEngine {
    suppressions: Vec<Suppression>,
    system_library_regexes: Vec<Regex>,
}

impl SuppressionEngine {
    /// Loads the bundled defaults, then every file named in
    /// `LSAN_SUPPRESSION_FILES`/`LSAN_SYSTEM_LIBRARY_FILES` (§6.2), logging
    /// and skipping any file or entry that fails to parse rather than
    /// aborting the whole load.
    pub fn load(config: &Config) -> Self {
        let mut suppressions = Vec::new();
        match parse_suppressions(DEFAULT_SUPPRESSIONS, Path::new("<built-in>"), config) {
            Ok(mut parsed) => suppressions.append(&mut parsed),
            Err(error) => tracing::error!(%error, "failed to load built-in suppressions"),
        }
        for path in &config.suppression_files {
            match std::fs::read_to_string(path) {
                Ok(text) => match parse_suppressions(&text, path, config) {
                    Ok(mut parsed) => suppressions.append(&mut parsed),
                    Err(error) => tracing::error!(path = %path.display(), %error, "failed to load suppression file"),
                },
                Err(source) => {
                    let error = SuppressionError::Io { path: path.clone(), source };
                    tracing::error!(%error, "failed to read suppression file");
                }
            }
        }

        let mut system_library_regexes = match parse_system_libraries(DEFAULT_SYSTEM_LIBRARIES, Path::new("<built-in>")) {
            Ok(patterns) => patterns,
            Err(error) => {
                tracing::error!(%error, "failed to load built-in system library patterns");
                Vec::new()
            }
        };
        for path in &config.system_library_files {
            match std::fs::read_to_string(path) {
                Ok(text) => match parse_system_libraries(&text, path) {
                    Ok(mut parsed) => system_library_regexes.append(&mut parsed),
                    Err(error) => tracing::error!(path = %path.display(), %error, "failed to load system library file"),
                },
                Err(source) => {
                    let error = SuppressionError::Io { path: path.clone(), source };
                    tracing::error!(%error, "failed to read system library file");
                }
            }
        }

        Self {
            suppressions,
            system_library_regexes,
        }
    }

    /// Whether `image_name` matches a system-library pattern — unconditional
    /// regardless of the declarative suppression list (§4.C10).
    pub fn is_system_library(&self, image_name: &str) -> bool {
        self.system_library_regexes.iter().any(|re| re.is_match(image_name))
    }

    /// The first suppression (in load order) matching `record`, if any.
    pub fn matching<'a>(&'a self, record: &AllocationRecord, regions: &[LoadedRegion]) -> Option<&'a Suppression> {
        self.suppressions.iter().find(|s| s.matches(record, regions))
    }
}

fn parse_suppressions(text: &str, path: &Path, config: &Config) -> Result<Vec<Suppression>> {
    let doc: raw::RawSuppressionDoc =
        serde_json::from_str(text).map_err(|source| SuppressionError::Json { path: path.to_path_buf(), source })?;
    let raws = match doc {
        raw::RawSuppressionDoc::One(r) => vec![r],
        raw::RawSuppressionDoc::Many(rs) => rs,
    };
    let mut out = Vec::with_capacity(raws.len());
    for raw in raws {
        if let Some(suppression) = convert(raw, config)? {
            out.push(suppression);
        }
    }
    Ok(out)
}

fn parse_system_libraries(text: &str, path: &Path) -> Result<Vec<Regex>> {
    let patterns: Vec<String> =
        serde_json::from_str(text).map_err(|source| SuppressionError::Json { path: path.to_path_buf(), source })?;
    patterns
        .into_iter()
        .map(|pattern| Regex::new(&pattern).map_err(|source| SuppressionError::Regex { path: path.to_path_buf(), source }))
        .collect()
}

/// Converts one parsed [`raw::RawSuppression`] into a matchable
/// [`Suppression`], or `Ok(None)` if a named function could not be resolved
/// and developer mode wants it silently dropped rather than treated as a
/// hard load error.
fn convert(raw: raw::RawSuppression, config: &Config) -> Result<Option<Suppression>> {
    let name = raw.name.clone().unwrap_or_else(|| "<unnamed>".to_string());

    if raw.image_name.is_none() && raw.functions.is_none() {
        return Err(SuppressionError::Empty { name });
    }

    let leak_kind = match raw.leak_kind {
        Some(ordinal) => Some(
            LeakKind::from_ordinal(ordinal).ok_or_else(|| SuppressionError::BadLeakKind {
                name: name.clone(),
                ordinal,
            })?,
        ),
        None => None,
    };

    let image_name = match &raw.image_name {
        Some(pattern) => Some(
            Regex::new(pattern).map_err(|source| SuppressionError::Regex {
                path: PathBuf::from(format!("<suppression {name}>")),
                source,
            })?,
        ),
        None => None,
    };

    let mut frames = Vec::new();
    if let Some(functions) = raw.functions {
        if functions.is_empty() {
            return Err(SuppressionError::EmptyFunctions { name });
        }
        for entry in functions {
            match resolve_entry(entry, &name, config)? {
                Some(matcher) => frames.push(matcher),
                None => return Ok(None),
            }
        }
    }

    Ok(Some(Suppression {
        name,
        size: raw.size,
        leak_kind,
        image_name,
        frames,
    }))
}

fn resolve_entry(entry: raw::RawFunctionEntry, name: &str, config: &Config) -> Result<Option<FrameMatcher>> {
    match entry {
        raw::RawFunctionEntry::Bare(function) => Ok(resolve_named(&function, None, None, name, config)),
        raw::RawFunctionEntry::Named { name: function, offset, library } => {
            Ok(resolve_named(&function, offset, library.as_deref(), name, config))
        }
        raw::RawFunctionEntry::LibraryOnly { library_regex } => {
            let patterns = match library_regex {
                raw::RawLibraryRegex::One(s) => vec![s],
                raw::RawLibraryRegex::Many(v) => v,
            };
            let mut regexes = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                regexes.push(Regex::new(&pattern).map_err(|source| SuppressionError::Regex {
                    path: PathBuf::from(format!("<suppression {name}>")),
                    source,
                })?);
            }
            Ok(Some(FrameMatcher::LibraryRegex(regexes)))
        }
    }
}

fn resolve_named(
    function: &str,
    offset: Option<i64>,
    library: Option<&str>,
    suppression_name: &str,
    config: &Config,
) -> Option<FrameMatcher> {
    let range = resolve::function_range(function, library);
    match range {
        Some(range) => {
            let (begin, length) = match offset {
                Some(off) => ((range.begin as i64 + off) as usize, 0),
                None => (range.begin, range.length),
            };
            Some(FrameMatcher::Range { begin, length })
        }
        None => {
            if config.suppression_developer_mode {
                tracing::warn!(function, suppression = suppression_name, "could not resolve function for suppression");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callstack::CallStack;

    fn record(size: usize) -> AllocationRecord {
        AllocationRecord::new(0x1000, size, 1, CallStack::capture(4))
    }

    #[test]
    fn size_only_suppression_matches_regardless_of_stack() {
        let s = Suppression {
            name: "by-size".into(),
            size: Some(64),
            leak_kind: None,
            image_name: None,
            frames: Vec::new(),
        };
        assert!(s.matches(&record(64), &[]));
        assert!(!s.matches(&record(32), &[]));
    }

    #[test]
    fn library_regex_matcher_checks_image_of_each_window_frame() {
        let region = LoadedRegion {
            region: crate::scanner::regions::Region::new(0x1000, 0x2000),
            absolute_name: "/usr/lib/libfoo.so".to_string(),
            relative_name: "libfoo.so".to_string(),
        };
        let matcher = FrameMatcher::LibraryRegex(vec![Regex::new("libfoo").unwrap()]);
        assert!(matcher.matches(0x1500, "/usr/lib/libfoo.so"));
        assert!(!matcher.matches(0x1500, "/usr/lib/libbar.so"));
        let _ = region;
    }

    #[test]
    fn empty_suppression_rejected_at_conversion() {
        let raw = raw::RawSuppression {
            name: Some("bad".into()),
            size: None,
            leak_kind: None,
            image_name: None,
            functions: None,
        };
        let err = convert(raw, &Config::default()).unwrap_err();
        assert!(matches!(err, SuppressionError::Empty { .. }));
    }

    #[test]
    fn empty_functions_array_rejected() {
        let raw = raw::RawSuppression {
            name: Some("bad".into()),
            size: None,
            leak_kind: None,
            image_name: Some(".*".into()),
            functions: Some(Vec::new()),
        };
        let err = convert(raw, &Config::default()).unwrap_err();
        assert!(matches!(err, SuppressionError::EmptyFunctions { .. }));
    }
}
