//! Core traits defined in `namestats-core` and implemented by other crates.

pub mod storage;

pub use storage::{ByteStream, StorageProvider};
