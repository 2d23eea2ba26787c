//! Built-in parser for `name,gender,count` line files.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use namestats_core::traits::storage::ByteStream;
use namestats_entity::record::NameRecord;

use super::lines::LineReader;
use super::{ParseContext, ParseStream, Parser, ParserMetadata};
use crate::error::IngestError;
use crate::normalizer::Normalizer;

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Headerless delimited files with one `name,gender,count` row per line.
///
/// Blank lines are skipped and Windows line endings are accepted.
#[derive(Debug, Clone)]
pub struct DelimitedParser {
    metadata: ParserMetadata,
    delimiter: char,
    channel_capacity: usize,
    normalizer: Normalizer,
}

impl DelimitedParser {
    /// Create a comma-delimited parser registered under `source_id`.
    pub fn new(source_id: &str, normalizer: Normalizer) -> Self {
        let source_id = source_id.trim().to_uppercase();
        Self {
            metadata: ParserMetadata {
                display_name: format!("{source_id} name counts"),
                description: "Headerless name,gender,count lines, one file per year".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                source_id,
            },
            delimiter: ',',
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            normalizer,
        }
    }

    /// Use a different field delimiter.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the record channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    fn split<'a>(&self, line: &'a str) -> Option<[&'a str; 3]> {
        let mut fields = line.split(self.delimiter);
        let fields = [fields.next()?, fields.next()?, fields.next()?];
        if line.matches(self.delimiter).count() != 2 {
            return None;
        }
        Some(fields)
    }

    fn field_count(&self, line: &str) -> usize {
        line.matches(self.delimiter).count() + 1
    }

    /// Turn one non-blank line into a normalized record.
    fn record(&self, year: i32, line_no: u64, line: &str) -> Result<NameRecord, IngestError> {
        let invalid = |reason: String| IngestError::InvalidRecord {
            line: line_no,
            reason,
        };

        let [name, gender, count] = self.split(line).ok_or_else(|| {
            invalid(format!(
                "expected 3 fields, found {}",
                self.field_count(line)
            ))
        })?;
        let count: i32 = count
            .trim()
            .parse()
            .map_err(|_| invalid(format!("count '{}' is not an integer", count.trim())))?;

        let mut record = NameRecord::new(year, name, gender, count);
        self.normalizer
            .normalize_record(&mut record)
            .map_err(|e| invalid(e.to_string()))?;
        Ok(record)
    }

    async fn produce(
        self,
        ctx: ParseContext,
        stream: ByteStream,
        records: &mpsc::Sender<NameRecord>,
    ) -> Result<u64, IngestError> {
        let mut reader = LineReader::new(stream);
        let mut sent = 0u64;

        while let Some((line_no, line)) = reader.next_line(&ctx.cancel).await? {
            if line.trim().is_empty() {
                continue;
            }
            let record = self.record(ctx.year, line_no, &line)?;

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(IngestError::Cancelled),
                res = records.send(record) => {
                    if res.is_err() {
                        // Consumer went away; nothing left to do.
                        return Ok(sent);
                    }
                }
            }
            sent += 1;
        }
        Ok(sent)
    }
}

#[async_trait]
impl Parser for DelimitedParser {
    fn metadata(&self) -> &ParserMetadata {
        &self.metadata
    }

    async fn validate(&self, ctx: &ParseContext, stream: ByteStream) -> Result<(), IngestError> {
        let mut reader = LineReader::new(stream);
        let mut data_lines = 0u64;

        while let Some((line_no, line)) = reader.next_line(&ctx.cancel).await? {
            if line.trim().is_empty() {
                continue;
            }
            let format_error =
                |reason: String| IngestError::InvalidFormat(format!("line {line_no}: {reason}"));

            let [_, gender, count] = self.split(&line).ok_or_else(|| {
                format_error(format!(
                    "expected 3 fields, found {}",
                    self.field_count(&line)
                ))
            })?;
            if count.trim().parse::<i64>().is_err() {
                return Err(format_error(format!(
                    "count '{}' is not numeric",
                    count.trim()
                )));
            }
            self.normalizer
                .normalize_gender(gender)
                .map_err(|e| format_error(e.to_string()))?;
            data_lines += 1;
        }

        if data_lines == 0 {
            return Err(IngestError::InvalidFormat("file has no data lines".to_string()));
        }
        debug!(
            source_id = %self.metadata.source_id,
            dataset_id = %ctx.dataset_id,
            data_lines,
            "Format check passed"
        );
        Ok(())
    }

    fn parse(&self, ctx: &ParseContext, stream: ByteStream) -> ParseStream {
        let (record_tx, record_rx) = mpsc::channel(self.channel_capacity);
        let (error_tx, error_rx) = mpsc::channel(1);
        let parser = self.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let dataset_id = ctx.dataset_id;
            match parser.produce(ctx, stream, &record_tx).await {
                Ok(sent) => debug!(%dataset_id, records = sent, "Parser finished"),
                Err(e) => {
                    warn!(%dataset_id, error = %e, "Parser stopped");
                    // The error must be queued before the record channel closes.
                    let _ = error_tx.send(e).await;
                }
            }
            drop(record_tx);
        });

        ParseStream {
            records: record_rx,
            errors: error_rx,
        }
    }
}
