//! Pluggable streaming parsers.
//!
//! A [`Parser`] turns one uploaded file into a stream of normalized
//! [`NameRecord`]s. Parsing runs in its own task and hands records over a
//! bounded channel; the first error travels over a separate single-slot
//! channel and ends the stream.

pub mod delimited;
pub mod lines;
pub mod registry;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use namestats_core::traits::storage::ByteStream;
use namestats_entity::record::NameRecord;

use crate::error::IngestError;

/// Descriptive information about a parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserMetadata {
    /// Registry key, usually a country code.
    pub source_id: String,
    /// Human-readable name.
    pub display_name: String,
    /// What the parser accepts.
    pub description: String,
    /// Parser version.
    pub version: String,
}

/// Per-call inputs to a parser.
#[derive(Debug, Clone)]
pub struct ParseContext {
    /// Data year stamped on every record.
    pub year: i32,
    /// Dataset being loaded.
    pub dataset_id: Uuid,
    /// Country the dataset belongs to.
    pub country_code: String,
    /// Shutdown signal.
    pub cancel: CancellationToken,
}

/// Receiving ends of a running parse.
///
/// Both channels close once the producer stops. At most one error is ever
/// sent, and it is sent before the record channel closes.
#[derive(Debug)]
pub struct ParseStream {
    /// Normalized records in file order.
    pub records: mpsc::Receiver<NameRecord>,
    /// The error that stopped parsing, if any.
    pub errors: mpsc::Receiver<IngestError>,
}

/// A source-specific file format.
#[async_trait]
pub trait Parser: Send + Sync + std::fmt::Debug + 'static {
    /// Parser identity.
    fn metadata(&self) -> &ParserMetadata;

    /// Quick format check over the whole file.
    async fn validate(&self, ctx: &ParseContext, stream: ByteStream) -> Result<(), IngestError>;

    /// Start parsing in a background task.
    fn parse(&self, ctx: &ParseContext, stream: ByteStream) -> ParseStream;
}
