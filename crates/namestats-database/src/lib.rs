//! # namestats-database
//!
//! PostgreSQL connection management, the store traits the ingestion
//! pipeline is written against, their PostgreSQL repositories, and an
//! in-memory implementation used by tests and local dry runs.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use store::{DatasetStore, JobStore, NameCountStore, STALE_LOCK_ERROR};
