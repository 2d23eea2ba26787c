//! # namestats-core
//!
//! Core crate for NameStats. Contains the unified error system, the
//! configuration schemas, and the storage provider trait implemented by
//! `namestats-storage`.
//!
//! This crate has **no** internal dependencies on other NameStats crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;

pub use error::AppError;
pub use result::AppResult;
