//! # namestats-ingest
//!
//! Turns uploaded name-count files into validated rows: filename year
//! extraction, pluggable streaming parsers, record normalization, and the
//! batch inserter that drains a parse stream into the name-count store.

pub mod error;
pub mod filename;
pub mod inserter;
pub mod normalizer;
pub mod parser;

pub use error::IngestError;
pub use inserter::BatchInserter;
pub use normalizer::Normalizer;
pub use parser::registry::ParserRegistry;
pub use parser::{ParseContext, ParseStream, Parser, ParserMetadata};
