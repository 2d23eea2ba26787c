//! Record normalization and validation.

use namestats_core::config::NormalizerConfig;
use namestats_entity::record::{Gender, NameRecord};

use crate::error::IngestError;

/// Applies the configured bounds and canonical forms to parsed records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

impl Normalizer {
    /// Create a normalizer with the given limits.
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// The limits in effect.
    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Map a raw gender token onto [`Gender`].
    ///
    /// Accepts `M`/`Male`/`1` and `F`/`Female`/`2`, case-insensitively.
    pub fn normalize_gender(&self, raw: &str) -> Result<Gender, IngestError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "m" | "male" | "1" => Ok(Gender::Male),
            "f" | "female" | "2" => Ok(Gender::Female),
            "" => Err(IngestError::Normalization("gender is empty".to_string())),
            _ => Err(IngestError::Normalization(format!(
                "unrecognized gender '{}'",
                raw.trim()
            ))),
        }
    }

    /// Trim, check and title-case a name.
    pub fn normalize_name(&self, raw: &str) -> Result<String, IngestError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IngestError::Normalization("name is empty".to_string()));
        }

        let length = trimmed.chars().count();
        if length > self.config.max_name_length {
            return Err(IngestError::Normalization(format!(
                "name is {length} characters, longer than {}",
                self.config.max_name_length
            )));
        }

        if let Some(bad) = trimmed.chars().find(|c| !is_name_char(*c)) {
            return Err(IngestError::Normalization(format!(
                "name '{trimmed}' contains invalid character '{bad}'"
            )));
        }

        Ok(trimmed
            .split_whitespace()
            .map(title_case_word)
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Check a data year against the configured range.
    pub fn validate_year(&self, year: i32) -> Result<(), IngestError> {
        if year < self.config.min_year || year > self.config.max_year {
            return Err(IngestError::Normalization(format!(
                "year {year} outside {}..={}",
                self.config.min_year, self.config.max_year
            )));
        }
        Ok(())
    }

    /// Check an occurrence count against the configured minimum.
    pub fn validate_count(&self, count: i32) -> Result<(), IngestError> {
        if count < self.config.min_count {
            return Err(IngestError::Normalization(format!(
                "count {count} below minimum {}",
                self.config.min_count
            )));
        }
        Ok(())
    }

    /// Validate and rewrite a record in place: year, name, gender, count.
    ///
    /// Stops at the first failing field. Normalizing a normalized record
    /// leaves it unchanged.
    pub fn normalize_record(&self, record: &mut NameRecord) -> Result<(), IngestError> {
        self.validate_year(record.year)?;
        record.name = self.normalize_name(&record.name)?;
        record.gender = self.normalize_gender(&record.gender)?.as_str().to_string();
        self.validate_count(record.count)?;
        Ok(())
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphabetic() || matches!(c, ' ' | '-' | '\'' | '.')
}

/// Upper-case the first letter of every hyphen- or apostrophe-delimited
/// segment and lower-case the rest.
fn title_case_word(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut segment_start = true;
    for c in word.chars() {
        if segment_start {
            out.push(single_char(c.to_uppercase(), c));
        } else {
            out.push(single_char(c.to_lowercase(), c));
        }
        segment_start = matches!(c, '-' | '\'');
    }
    out
}

// Case mappings that expand to several chars (e.g. 'ß' -> "SS") are skipped
// so that the length check and idempotence hold.
fn single_char(mut mapped: impl Iterator<Item = char>, original: char) -> char {
    match (mapped.next(), mapped.next()) {
        (Some(c), None) => c,
        _ => original,
    }
}
