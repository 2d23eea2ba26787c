//! Storage provider configuration.

use serde::{Deserialize, Serialize};

/// Uploaded file storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root path for local file storage.
    #[serde(default = "default_local_root")]
    pub local_root: String,
    /// Maximum accepted upload size in bytes (default 100 MB).
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_root: default_local_root(),
            max_upload_bytes: default_max_upload(),
        }
    }
}

fn default_local_root() -> String {
    "./data/uploads".to_string()
}

fn default_max_upload() -> u64 {
    104_857_600 // 100 MB
}
