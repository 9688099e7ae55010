//! The on-disk suppression JSON shape (§6.3), deserialized as-is before
//! [`super::convert`] resolves it into a matchable [`super::Suppression`].

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawFunctionEntry {
    /// A bare function name, matched at its resolved address with no
    /// offset (a zero-length, exact-address match).
    Bare(String),
    Named {
        name: String,
        offset: Option<i64>,
        library: Option<String>,
    },
    LibraryOnly {
        #[serde(rename = "libraryRegex")]
        library_regex: RawLibraryRegex,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawLibraryRegex {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
pub struct RawSuppression {
    pub name: Option<String>,
    pub size: Option<u64>,
    #[serde(rename = "type")]
    pub leak_kind: Option<u64>,
    #[serde(rename = "imageName")]
    pub image_name: Option<String>,
    pub functions: Option<Vec<RawFunctionEntry>>,
}

/// The file may contain a single suppression object or an array of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawSuppressionDoc {
    One(RawSuppression),
    Many(Vec<RawSuppression>),
}
