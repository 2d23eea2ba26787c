//! In-flight name-count record.

use serde::{Deserialize, Serialize};

use super::gender::Gender;

/// One name/gender/year/count observation produced by a parser.
///
/// Parsers fill it from raw input and run it through the normalizer,
/// which rewrites `name` and `gender` in place. Only normalized records
/// reach the bulk insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    /// Data year.
    pub year: i32,
    /// Given name.
    pub name: String,
    /// Gender code (`M` or `F` once normalized).
    pub gender: String,
    /// Number of occurrences.
    pub count: i32,
}

impl NameRecord {
    /// Build a record from parsed fields.
    pub fn new(year: i32, name: impl Into<String>, gender: impl Into<String>, count: i32) -> Self {
        Self {
            year,
            name: name.into(),
            gender: gender.into(),
            count,
        }
    }

    /// Build an already-normalized record.
    pub fn normalized(year: i32, name: impl Into<String>, gender: Gender, count: i32) -> Self {
        Self::new(year, name, gender.as_str(), count)
    }
}
