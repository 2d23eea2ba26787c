//! In-memory storage provider.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use namestats_core::error::AppError;
use namestats_core::result::AppResult;
use namestats_core::traits::storage::{ByteStream, StorageProvider};

use super::{check_path, object_path};

const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Keeps files in a map and streams them back in fixed-size chunks.
#[derive(Debug)]
pub struct MemoryStorageProvider {
    files: RwLock<HashMap<String, Bytes>>,
    chunk_size: usize,
}

impl Default for MemoryStorageProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create a provider whose `load` yields chunks of at most `chunk_size` bytes.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Place a file at an exact path.
    pub fn insert(&self, path: &str, data: impl Into<Bytes>) -> AppResult<()> {
        let path = check_path(path)?.to_string();
        self.files
            .write()
            .map_err(|_| AppError::internal("Memory storage lock poisoned"))?
            .insert(path, data.into());
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    fn provider_type(&self) -> &str {
        "memory"
    }

    async fn save(&self, scope_id: &str, filename: &str, data: Bytes) -> AppResult<String> {
        let path = object_path(scope_id, filename)?;
        self.insert(&path, data)?;
        Ok(path)
    }

    async fn load(&self, path: &str) -> AppResult<ByteStream> {
        let key = check_path(path)?;
        let data = self
            .files
            .read()
            .map_err(|_| AppError::internal("Memory storage lock poisoned"))?
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("File not found: {path}")))?;

        let mut chunks: Vec<Result<Bytes, std::io::Error>> = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.chunk_size).min(data.len());
            chunks.push(Ok(data.slice(offset..end)));
            offset = end;
        }
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn delete(&self, path: &str) -> AppResult<()> {
        let key = check_path(path)?;
        self.files
            .write()
            .map_err(|_| AppError::internal("Memory storage lock poisoned"))?
            .remove(key);
        Ok(())
    }

    async fn exists(&self, path: &str) -> AppResult<bool> {
        let key = check_path(path)?;
        Ok(self
            .files
            .read()
            .map_err(|_| AppError::internal("Memory storage lock poisoned"))?
            .contains_key(key))
    }
}
