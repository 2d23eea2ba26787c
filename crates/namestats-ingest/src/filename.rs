//! Data year extraction from upload filenames.

use namestats_core::config::NormalizerConfig;

use crate::error::IngestError;

/// Find the data year in a filename such as `yob2023.txt`.
///
/// The extension is dropped, then the first run of exactly four ASCII
/// digits whose value lies within the configured year range wins.
pub fn extract_year(filename: &str, limits: &NormalizerConfig) -> Result<i32, IngestError> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };

    let bytes = stem.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i - start == 4 {
            if let Ok(year) = stem[start..i].parse::<i32>() {
                if (limits.min_year..=limits.max_year).contains(&year) {
                    return Ok(year);
                }
            }
        }
    }

    Err(IngestError::InvalidFilename(filename.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_year() {
        let limits = NormalizerConfig::default();
        assert_eq!(extract_year("yob2023.txt", &limits).unwrap(), 2023);
        assert_eq!(extract_year("names_2024.csv", &limits).unwrap(), 2024);
        assert_eq!(extract_year("US/yob1880.TXT", &limits).unwrap(), 1880);
        assert!(extract_year("report.csv", &limits).is_err());
    }

    #[test]
    fn test_extract_year_skips_unusable_runs() {
        let limits = NormalizerConfig::default();
        // Five digits is not a year; 0042 is out of range.
        assert_eq!(extract_year("batch12345_0042_1999.txt", &limits).unwrap(), 1999);
        assert!(extract_year("data20230101.csv", &limits).is_err());
        // Digits in the extension are ignored.
        assert!(extract_year("names.2023", &limits).is_err());
    }
}
