//! Compression codec abstraction for streaming decompression.
//!
//! Each codec wraps an open file in a buffered reader that yields the
//! decompressed bytes, so sources are never loaded into memory whole.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::config::CompressionFormat;

/// Trait for codecs that can stream-decompress a source file.
pub trait CompressionCodec: Send + Sync {
    /// Wrap `file` in a reader yielding decompressed data.
    ///
    /// Codecs that detect corruption lazily report it from the returned
    /// reader rather than from this call.
    fn create_reader(&self, file: File) -> io::Result<Box<dyn BufRead + Send>>;

    /// Human-readable name of this codec (for logging).
    fn name(&self) -> &'static str;
}

/// Gzip codec. Concatenated members are read as one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl CompressionCodec for GzipCodec {
    fn create_reader(&self, file: File) -> io::Result<Box<dyn BufRead + Send>> {
        let decoder = flate2::read::MultiGzDecoder::new(BufReader::new(file));
        Ok(Box::new(BufReader::new(decoder)))
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}

/// Zstandard codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

impl CompressionCodec for ZstdCodec {
    fn create_reader(&self, file: File) -> io::Result<Box<dyn BufRead + Send>> {
        let decoder = zstd::stream::read::Decoder::new(file)?;
        Ok(Box::new(BufReader::new(decoder)))
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}

/// No-op codec for plain text sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCodec;

impl CompressionCodec for NoopCodec {
    fn create_reader(&self, file: File) -> io::Result<Box<dyn BufRead + Send>> {
        Ok(Box::new(BufReader::new(file)))
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Pick the codec for `path`, resolving `Auto` by extension.
pub fn codec_for(format: CompressionFormat, path: &Path) -> &'static dyn CompressionCodec {
    match format.for_path(path) {
        CompressionFormat::Gzip => &GzipCodec,
        CompressionFormat::Zstd => &ZstdCodec,
        CompressionFormat::None | CompressionFormat::Auto => &NoopCodec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    const TEST_DATA: &[u8] = b"idfa\ta\t1\t2\t3\ngaid\tb\t1\t2\t3\n";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn read_all(codec: &dyn CompressionCodec, dir: &TempDir, name: &str, data: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        let mut reader = codec.create_reader(File::open(&path).unwrap()).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_gzip_codec() {
        let dir = TempDir::new().unwrap();
        let out = read_all(&GzipCodec, &dir, "a.gz", &gzip(TEST_DATA));
        assert_eq!(out.as_bytes(), TEST_DATA);
    }

    #[test]
    fn test_gzip_multi_member() {
        let dir = TempDir::new().unwrap();
        let mut data = gzip(b"first\n");
        data.extend(gzip(b"second\n"));

        let out = read_all(&GzipCodec, &dir, "multi.gz", &data);
        assert_eq!(out, "first\nsecond\n");
    }

    #[test]
    fn test_gzip_corrupt_fails_on_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.gz");
        std::fs::write(&path, b"this is not gzip").unwrap();

        let mut reader = GzipCodec.create_reader(File::open(&path).unwrap()).unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_zstd_codec() {
        let dir = TempDir::new().unwrap();
        let data = zstd::encode_all(TEST_DATA, 3).unwrap();
        let out = read_all(&ZstdCodec, &dir, "a.zst", &data);
        assert_eq!(out.as_bytes(), TEST_DATA);
    }

    #[test]
    fn test_noop_codec() {
        let dir = TempDir::new().unwrap();
        let out = read_all(&NoopCodec, &dir, "a.tsv", TEST_DATA);
        assert_eq!(out.as_bytes(), TEST_DATA);
    }

    #[test]
    fn test_codec_for() {
        let gz = Path::new("x.tsv.gz");
        assert_eq!(codec_for(CompressionFormat::Gzip, gz).name(), "gzip");
        assert_eq!(codec_for(CompressionFormat::Auto, gz).name(), "gzip");
        assert_eq!(
            codec_for(CompressionFormat::Auto, Path::new("x.zstd")).name(),
            "zstd"
        );
        assert_eq!(codec_for(CompressionFormat::None, gz).name(), "none");
    }
}
