//! Ingestion error type and retry classification.

use uuid::Uuid;

use namestats_core::error::{AppError, ErrorKind};

/// Everything that can stop a dataset from loading.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// No parser is registered for the dataset's source.
    #[error("No parser registered for source '{0}'")]
    NoParser(String),

    /// The filename carries no usable year.
    #[error("Cannot derive a year from filename '{0}'")]
    InvalidFilename(String),

    /// The job payload could not be decoded.
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// The dataset is missing or soft-deleted.
    #[error("Dataset {0} not found")]
    DatasetNotFound(Uuid),

    /// The file failed the parser's quick format check.
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    /// A line could not be turned into a record.
    #[error("Line {line}: {reason}")]
    InvalidRecord {
        /// 1-based line number in the source file.
        line: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A field failed normalization.
    #[error("{0}")]
    Normalization(String),

    /// Reading the uploaded file failed.
    #[error("Storage error: {0}")]
    Storage(AppError),

    /// A store operation failed.
    #[error("Database error: {0}")]
    Database(AppError),

    /// Processing was interrupted by shutdown.
    #[error("Processing cancelled")]
    Cancelled,
}

impl IngestError {
    /// Whether running the same job again could succeed.
    ///
    /// A rejected batch is reported by the store as a validation error and
    /// will be rejected again, so it is terminal like any content error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(_) | Self::Cancelled => true,
            Self::Database(e) => !e.is(ErrorKind::Validation),
            _ => false,
        }
    }

    /// Short machine-friendly name of the variant, used in log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoParser(_) => "no_parser",
            Self::InvalidFilename(_) => "invalid_filename",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::DatasetNotFound(_) => "dataset_not_found",
            Self::InvalidFormat(_) => "invalid_format",
            Self::InvalidRecord { .. } => "invalid_record",
            Self::Normalization(_) => "normalization",
            Self::Storage(_) => "storage",
            Self::Database(_) => "database",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(IngestError::Cancelled.is_retryable());
        assert!(IngestError::Storage(AppError::storage("disk gone")).is_retryable());
        assert!(IngestError::Database(AppError::database("connection reset")).is_retryable());
        assert!(!IngestError::Database(AppError::validation("Batch rejected")).is_retryable());
        assert!(!IngestError::NoParser("ZZ".into()).is_retryable());
        assert!(!IngestError::InvalidFilename("report.csv".into()).is_retryable());
        assert!(
            !IngestError::InvalidRecord {
                line: 4,
                reason: "bad count".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_record_error_message_carries_line() {
        let err = IngestError::InvalidRecord {
            line: 12,
            reason: "unrecognized gender 'X'".into(),
        };
        assert_eq!(err.to_string(), "Line 12: unrecognized gender 'X'");
    }
}
