//! Dataset services.

pub mod upload;
