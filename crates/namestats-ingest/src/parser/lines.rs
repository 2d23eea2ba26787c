//! Incremental line splitting over a byte stream.

use bytes::Bytes;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use namestats_core::error::{AppError, ErrorKind};
use namestats_core::traits::storage::ByteStream;

use crate::error::IngestError;

/// Yields `\n`-terminated lines from a chunked byte stream.
///
/// Chunk boundaries may fall anywhere, including inside a line or a UTF-8
/// sequence. A trailing `\r` is removed and the last line need not end in
/// a newline.
pub struct LineReader {
    reader: StreamReader<ByteStream, Bytes>,
    buf: Vec<u8>,
    line_no: u64,
}

impl LineReader {
    /// Wrap a byte stream.
    pub fn new(stream: ByteStream) -> Self {
        Self {
            reader: StreamReader::new(stream),
            buf: Vec::new(),
            line_no: 0,
        }
    }

    /// Next line with its 1-based number, or `None` at end of input.
    pub async fn next_line(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<(u64, String)>, IngestError> {
        self.buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            read = self.reader.read_until(b'\n', &mut self.buf) => read.map_err(|e| {
                IngestError::Storage(AppError::with_source(
                    ErrorKind::Storage,
                    "Failed to read dataset file",
                    e,
                ))
            })?,
        };
        if read == 0 {
            return Ok(None);
        }

        self.line_no += 1;
        let raw = self.buf.as_slice();
        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let text = std::str::from_utf8(raw).map_err(|_| IngestError::InvalidRecord {
            line: self.line_no,
            reason: "line is not valid UTF-8".to_string(),
        })?;
        Ok(Some((self.line_no, text.to_string())))
    }
}

impl std::fmt::Debug for LineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("line_no", &self.line_no)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(chunks: &[&'static [u8]]) -> ByteStream {
        let items: Vec<Result<Bytes, std::io::Error>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(*c))).collect();
        Box::pin(futures::stream::iter(items))
    }

    async fn collect(stream: ByteStream) -> Vec<(u64, String)> {
        let cancel = CancellationToken::new();
        let mut reader = LineReader::new(stream);
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line(&cancel).await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let lines = collect(chunked(&[&b"Em"[..], &b"ma,F,1\r"[..], &b"\n\nJos\xc3"[..], &b"\xa9,M,2"[..]])).await;
        assert_eq!(
            lines,
            vec![
                (1, "Emma,F,1".to_string()),
                (2, String::new()),
                (3, "José,M,2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_stream_has_no_lines() {
        assert!(collect(chunked(&[])).await.is_empty());
        assert_eq!(collect(chunked(&[&b"\n"[..]])).await, vec![(1, String::new())]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_reports_line() {
        let cancel = CancellationToken::new();
        let mut reader = LineReader::new(chunked(&[&b"Ok,F,1\nBad\xff,F,1\n"[..]]));
        reader.next_line(&cancel).await.unwrap();
        match reader.next_line(&cancel).await {
            Err(IngestError::InvalidRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_read() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut reader = LineReader::new(chunked(&[&b"Ann,F,1\n"[..]]));
        assert!(matches!(
            reader.next_line(&cancel).await,
            Err(IngestError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_read_error_surfaces_as_storage() {
        let items: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"Ann,F,1\nBo")),
            Err(std::io::Error::other("disk gone")),
        ];
        let cancel = CancellationToken::new();
        let mut reader = LineReader::new(Box::pin(futures::stream::iter(items)));
        assert_eq!(
            reader.next_line(&cancel).await.unwrap(),
            Some((1, "Ann,F,1".to_string()))
        );
        assert!(matches!(
            reader.next_line(&cancel).await,
            Err(IngestError::Storage(_))
        ));
    }
}
