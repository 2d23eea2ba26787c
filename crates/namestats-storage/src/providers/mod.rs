//! Storage provider implementations.

pub mod local;
pub mod memory;

use namestats_core::error::AppError;
use namestats_core::result::AppResult;
use namestats_core::traits::storage::sanitize_filename;

/// Build the relative path a new upload is stored under.
///
/// A fresh UUID prefix keeps re-uploads of the same filename apart.
pub(crate) fn object_path(scope_id: &str, filename: &str) -> AppResult<String> {
    let scope = scope_id.trim();
    if scope.is_empty() || !scope.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(AppError::validation(format!(
            "Invalid storage scope: '{scope_id}'"
        )));
    }
    Ok(format!(
        "{}/{}_{}",
        scope,
        uuid::Uuid::new_v4().simple(),
        sanitize_filename(filename)
    ))
}

/// Reject relative paths that could escape the storage root.
pub(crate) fn check_path(path: &str) -> AppResult<&str> {
    let clean = path.trim_start_matches('/');
    if clean.is_empty() || clean.split(['/', '\\']).any(|part| part == "..") {
        return Err(AppError::validation(format!("Invalid storage path: '{path}'")));
    }
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path_layout() {
        let path = object_path("US", "../yob2023.txt").unwrap();
        assert!(path.starts_with("US/"));
        assert!(path.ends_with("_yob2023.txt"));
        assert!(object_path("U/S", "a.txt").is_err());
        assert!(object_path("", "a.txt").is_err());
    }

    #[test]
    fn test_check_path_rejects_traversal() {
        assert_eq!(check_path("/US/a.txt").unwrap(), "US/a.txt");
        assert!(check_path("US/../../etc/passwd").is_err());
        assert!(check_path("/").is_err());
    }
}
