//! Error taxonomy for the parts of the sanitizer that can fail recoverably.
//!
//! Everything else — invalid frees, double frees, alignment violations,
//! suspend failures — is handled locally (warn or conditionally terminate,
//! see [`crate::crash`]) and never surfaces as a `Result`: the wrapped
//! allocator's C ABI contract promises an infallible `void`/pointer return,
//! and the core must not break that promise.

use std::path::PathBuf;

/// Failure modes of loading suppressions or system-library regex files.
#[derive(Debug, thiserror::Error)]
pub enum SuppressionError {
    #[error("failed to read suppression file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid regular expression in {path}: {source}")]
    Regex {
        path: PathBuf,
        #[source]
        source: regex::Error,
    },

    #[error("suppression '{name}' references unresolvable function '{function}'")]
    FunctionNotFound { name: String, function: String },

    #[error("suppression '{name}' has neither 'imageName' nor 'functions'")]
    Empty { name: String },

    #[error("suppression '{name}' has an empty 'functions' array")]
    EmptyFunctions { name: String },

    #[error("suppression '{name}' has an out-of-range leak-kind ordinal {ordinal}")]
    BadLeakKind { name: String, ordinal: u64 },
}

pub type Result<T> = std::result::Result<T, SuppressionError>;
