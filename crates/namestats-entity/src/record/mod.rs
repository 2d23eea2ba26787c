//! Parsed name-count records.

pub mod gender;
pub mod model;

pub use gender::Gender;
pub use model::NameRecord;
