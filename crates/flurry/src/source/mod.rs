//! Source discovery and streaming decompression of TSV files.

mod compression;
mod listing;
mod reader;

pub use compression::{CompressionCodec, GzipCodec, NoopCodec, ZstdCodec, codec_for};
pub use listing::{DONE_PREFIX, list_sources};
pub use reader::{LineChunk, LineReader, ReadSummary, spawn_read_task};
