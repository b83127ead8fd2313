//! Blocking line reader streaming chunks of decompressed lines.
//!
//! Decompression runs on the blocking pool and hands chunks to the async
//! side through a small bounded channel, so a slow consumer stalls the
//! reader instead of buffering the whole file.

use std::io::BufRead;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use snafu::prelude::*;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::CompressionFormat;
use crate::error::{DecompressSnafu, OpenSnafu, ReaderError};
use flurry_core::emit;
use flurry_core::metrics::events::{FileReadCompleted, LinesRead};

use super::compression::codec_for;

/// Chunks buffered between the reader and its consumer.
const CHUNK_CHANNEL_CAPACITY: usize = 4;

/// A batch of non-blank lines.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LineChunk {
    /// Lines without their line terminator.
    pub lines: Vec<String>,
    /// Non-blank lines that were not valid UTF-8.
    pub invalid_utf8: u64,
}

impl LineChunk {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Vec::with_capacity(capacity),
            invalid_utf8: 0,
        }
    }

    /// Number of non-blank lines in this chunk.
    pub fn len(&self) -> usize {
        self.lines.len() + self.invalid_utf8 as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Totals for one fully read source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadSummary {
    pub lines: u64,
    pub invalid_utf8: u64,
}

/// Reads a compressed source file line by line.
#[derive(Debug, Clone)]
pub struct LineReader {
    batch_size: usize,
    compression: CompressionFormat,
}

impl LineReader {
    pub fn new(batch_size: usize, compression: CompressionFormat) -> Self {
        Self {
            batch_size: batch_size.max(1),
            compression,
        }
    }

    /// Read `path` and stream chunks of lines through `on_chunk`.
    ///
    /// Blank lines are skipped. Returning `Break` from the callback stops
    /// reading early; the summary then covers what was delivered.
    pub fn read_lines(
        &self,
        path: &Path,
        on_chunk: &mut dyn FnMut(LineChunk) -> ControlFlow<()>,
    ) -> Result<ReadSummary, ReaderError> {
        let start = Instant::now();
        let codec = codec_for(self.compression, path);

        let file = std::fs::File::open(path).context(OpenSnafu { path })?;
        let mut reader = codec.create_reader(file).context(DecompressSnafu {
            path,
            codec: codec.name(),
        })?;

        let mut summary = ReadSummary::default();
        let mut chunk = LineChunk::with_capacity(self.batch_size);
        let mut buf = Vec::with_capacity(256);

        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf).context(DecompressSnafu {
                path,
                codec: codec.name(),
            })?;
            if read == 0 {
                break;
            }
            if buf.trim_ascii().is_empty() {
                continue;
            }

            match std::str::from_utf8(&buf) {
                Ok(line) => chunk
                    .lines
                    .push(line.trim_end_matches(['\n', '\r']).to_string()),
                Err(_) => chunk.invalid_utf8 += 1,
            }

            if chunk.len() >= self.batch_size {
                let full = std::mem::replace(&mut chunk, LineChunk::with_capacity(self.batch_size));
                if deliver(full, &mut summary, on_chunk).is_break() {
                    return Ok(summary);
                }
            }
        }

        if !chunk.is_empty() {
            let _ = deliver(chunk, &mut summary, on_chunk);
        }

        emit!(FileReadCompleted {
            duration: start.elapsed(),
        });
        debug!(
            file = %path.display(),
            codec = codec.name(),
            lines = summary.lines,
            invalid_utf8 = summary.invalid_utf8,
            "Finished reading source"
        );

        Ok(summary)
    }
}

fn deliver(
    chunk: LineChunk,
    summary: &mut ReadSummary,
    on_chunk: &mut dyn FnMut(LineChunk) -> ControlFlow<()>,
) -> ControlFlow<()> {
    let count = chunk.len() as u64;
    summary.lines += count;
    summary.invalid_utf8 += chunk.invalid_utf8;
    emit!(LinesRead { count });
    on_chunk(chunk)
}

/// Spawn a blocking task that reads `path` and sends chunks over a channel.
///
/// The receiver is returned immediately. A read error is sent as the last
/// item; dropping the receiver stops the reader at the next chunk.
pub fn spawn_read_task(
    reader: Arc<LineReader>,
    path: PathBuf,
) -> mpsc::Receiver<Result<LineChunk, ReaderError>> {
    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let result = reader.read_lines(&path, &mut |chunk| {
            match chunk_tx.blocking_send(Ok(chunk)) {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()), // receiver dropped
            }
        });

        if let Err(e) = result {
            // Receiver may already be gone
            let _ = chunk_tx.blocking_send(Err(e));
        }
    });

    chunk_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_gz(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap();
        path
    }

    fn collect(reader: &LineReader, path: &Path) -> (Vec<LineChunk>, ReadSummary) {
        let mut chunks = Vec::new();
        let summary = reader
            .read_lines(path, &mut |chunk| {
                chunks.push(chunk);
                ControlFlow::Continue(())
            })
            .unwrap();
        (chunks, summary)
    }

    #[test]
    fn test_chunks_and_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = write_gz(&dir, "a.tsv.gz", b"l1\n\nl2\r\n   \nl3\nl4\nl5");
        let reader = LineReader::new(2, CompressionFormat::Gzip);

        let (chunks, summary) = collect(&reader, &path);

        assert_eq!(summary.lines, 5);
        let sizes: Vec<usize> = chunks.iter().map(LineChunk::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(chunks[0].lines, vec!["l1", "l2"]);
        assert_eq!(chunks[2].lines, vec!["l5"]);
    }

    #[test]
    fn test_invalid_utf8_counted() {
        let dir = TempDir::new().unwrap();
        let path = write_gz(&dir, "b.tsv.gz", b"ok\n\xff\xfe\nok2\n");
        let reader = LineReader::new(10, CompressionFormat::Gzip);

        let (chunks, summary) = collect(&reader, &path);

        assert_eq!(summary.lines, 3);
        assert_eq!(summary.invalid_utf8, 1);
        assert_eq!(chunks[0].lines, vec!["ok", "ok2"]);
    }

    #[test]
    fn test_break_stops_reading() {
        let dir = TempDir::new().unwrap();
        let path = write_gz(&dir, "c.tsv.gz", b"1\n2\n3\n4\n5\n6\n");
        let reader = LineReader::new(2, CompressionFormat::Gzip);

        let mut seen = 0;
        let summary = reader
            .read_lines(&path, &mut |_| {
                seen += 1;
                ControlFlow::Break(())
            })
            .unwrap();

        assert_eq!(seen, 1);
        assert_eq!(summary.lines, 2);
    }

    #[test]
    fn test_missing_file() {
        let reader = LineReader::new(2, CompressionFormat::Gzip);
        let result = reader.read_lines(Path::new("/nonexistent/x.gz"), &mut |_| {
            ControlFlow::Continue(())
        });
        assert!(matches!(result, Err(ReaderError::Open { .. })));
    }

    #[test]
    fn test_corrupt_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.tsv.gz");
        std::fs::write(&path, b"plain text pretending to be gzip\n").unwrap();
        let reader = LineReader::new(2, CompressionFormat::Gzip);

        let result = reader.read_lines(&path, &mut |_| ControlFlow::Continue(()));
        assert!(matches!(result, Err(ReaderError::Decompress { .. })));
    }

    #[tokio::test]
    async fn test_spawn_read_task() {
        let dir = TempDir::new().unwrap();
        let path = write_gz(&dir, "d.tsv.gz", b"a\nb\nc\n");
        let reader = Arc::new(LineReader::new(2, CompressionFormat::Gzip));

        let mut rx = spawn_read_task(reader, path);
        let mut lines = Vec::new();
        while let Some(chunk) = rx.recv().await {
            lines.extend(chunk.unwrap().lines);
        }
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_spawn_read_task_reports_error() {
        let reader = Arc::new(LineReader::new(2, CompressionFormat::Gzip));
        let mut rx = spawn_read_task(reader, PathBuf::from("/nonexistent/y.gz"));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Err(ReaderError::Open { .. })));
        assert!(rx.recv().await.is_none());
    }
}
