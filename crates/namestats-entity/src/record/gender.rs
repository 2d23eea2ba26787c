//! Gender codes stored with name counts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized gender code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    /// Stored as `M`.
    #[serde(rename = "M")]
    Male,
    /// Stored as `F`.
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    /// The single-character code persisted in `name_counts.gender`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
