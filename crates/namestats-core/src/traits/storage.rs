//! Storage provider trait for pluggable uploaded-file backends.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::result::AppResult;

/// A byte stream type used for reading file contents.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Trait for uploaded dataset storage backends.
///
/// The ingestion pipeline only reads through [`StorageProvider::load`] and
/// checks [`StorageProvider::exists`]; `save` is called by the upload
/// boundary and `delete` by dataset cleanup.
#[async_trait]
pub trait StorageProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Return the provider type name (e.g., "local", "memory").
    fn provider_type(&self) -> &str;

    /// Store a file under a scope (usually a country code) and return its path.
    async fn save(&self, scope_id: &str, filename: &str, data: Bytes) -> AppResult<String>;

    /// Open a stored file as a byte stream.
    async fn load(&self, path: &str) -> AppResult<ByteStream>;

    /// Delete a stored file. Deleting a missing file is not an error.
    async fn delete(&self, path: &str) -> AppResult<()>;

    /// Check whether a file exists at the given path.
    async fn exists(&self, path: &str) -> AppResult<bool>;
}

/// Reduce a client-supplied filename to a safe single path segment.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
