use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{retry_disk_io, RecorderError, Result};

use super::WriterStream;

/// A gzip-compressed NDJSON stream (one JSON object per line), used for
/// raw diff/trade archival. Flushed by accumulated byte size rather than
/// row count, since raw frames vary widely in size (§4.6 "Raw diffs" /
/// "Raw trades", "by size").
pub struct NdjsonGzWriter {
    stream: WriterStream,
    inner: GzEncoder<BufWriter<File>>,
    bytes_since_flush: usize,
    flush_bytes: usize,
}

impl NdjsonGzWriter {
    pub fn open(path: &Path, stream: WriterStream, flush_bytes: usize) -> Result<Self> {
        let file = retry_disk_io(|| File::create(path))
            .map_err(|source| RecorderError::DiskIo { stream, source })?;
        let inner = GzEncoder::new(BufWriter::new(file), Compression::default());
        Ok(Self {
            stream,
            inner,
            bytes_since_flush: 0,
            flush_bytes,
        })
    }

    pub fn write_line(&mut self, json_line: &str) -> Result<()> {
        let inner = &mut self.inner;
        retry_disk_io(|| {
            inner
                .write_all(json_line.as_bytes())
                .and_then(|_| inner.write_all(b"\n"))
        })
        .map_err(|source| RecorderError::DiskIo {
            stream: self.stream,
            source,
        })?;
        self.bytes_since_flush += json_line.len() + 1;
        if self.bytes_since_flush >= self.flush_bytes {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        let stream = self.stream;
        retry_disk_io(|| self.inner.flush()).map_err(|source| RecorderError::DiskIo {
            stream,
            source,
        })?;
        self.bytes_since_flush = 0;
        Ok(())
    }

    /// `GzEncoder::finish` consumes the encoder, so only one attempt is
    /// possible here (see `CsvGzWriter::finish`).
    pub fn finish(self) -> Result<()> {
        self.inner
            .finish()
            .map_err(|source| RecorderError::DiskIo {
                stream: self.stream,
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_ndjson_lines_and_finalizes_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diffs.ndjson.gz");

        let mut writer = NdjsonGzWriter::open(&path, WriterStream::DepthDiffsRaw, 1 << 20).unwrap();
        writer.write_line(r#"{"a":1}"#).unwrap();
        writer.write_line(r#"{"a":2}"#).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out.lines().collect::<Vec<_>>(), vec![r#"{"a":1}"#, r#"{"a":2}"#]);
    }
}
