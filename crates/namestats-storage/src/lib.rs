//! # namestats-storage
//!
//! Storage providers for uploaded name-count files. The local provider is
//! used in production; the in-memory provider backs tests.

pub mod providers;

pub use providers::local::LocalStorageProvider;
pub use providers::memory::MemoryStorageProvider;
