//! Ingestion pipeline configuration.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Parsing and loading settings for uploaded datasets.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IngestConfig {
    /// Rows per bulk insert transaction.
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 10000))]
    pub batch_size: usize,
    /// Capacity of the parser-to-inserter record channel.
    #[serde(default = "default_channel_capacity")]
    #[validate(range(min = 1, max = 10000))]
    pub channel_capacity: usize,
    /// Field delimiter of the built-in line parser.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Country codes served by the built-in line parser.
    #[serde(default = "default_countries")]
    pub countries: Vec<String>,
    /// Record normalization limits.
    #[serde(default)]
    #[validate(nested)]
    pub normalizer: NormalizerConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            channel_capacity: default_channel_capacity(),
            delimiter: default_delimiter(),
            countries: default_countries(),
            normalizer: NormalizerConfig::default(),
        }
    }
}

/// Bounds applied to every parsed record.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_year_range"))]
pub struct NormalizerConfig {
    /// Longest accepted name, in characters.
    #[serde(default = "default_max_name_length")]
    #[validate(range(min = 1, max = 1000))]
    pub max_name_length: usize,
    /// Earliest accepted data year.
    #[serde(default = "default_min_year")]
    pub min_year: i32,
    /// Latest accepted data year.
    #[serde(default = "default_max_year")]
    pub max_year: i32,
    /// Smallest accepted occurrence count.
    #[serde(default = "default_min_count")]
    #[validate(range(min = 1))]
    pub min_count: i32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_name_length: default_max_name_length(),
            min_year: default_min_year(),
            max_year: default_max_year(),
            min_count: default_min_count(),
        }
    }
}

fn validate_year_range(config: &NormalizerConfig) -> Result<(), ValidationError> {
    if config.min_year > config.max_year {
        return Err(ValidationError::new("min_year_after_max_year"));
    }
    Ok(())
}

fn default_batch_size() -> usize {
    1000
}

fn default_channel_capacity() -> usize {
    100
}

fn default_delimiter() -> char {
    ','
}

fn default_countries() -> Vec<String> {
    vec!["US".to_string()]
}

fn default_max_name_length() -> usize {
    100
}

fn default_min_year() -> i32 {
    1880
}

fn default_max_year() -> i32 {
    2100
}

fn default_min_count() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(IngestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_year_range_rejected() {
        let mut config = IngestConfig::default();
        config.normalizer.min_year = 2000;
        config.normalizer.max_year = 1999;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = IngestConfig {
            batch_size: 0,
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
