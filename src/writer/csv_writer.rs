use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{retry_disk_io, RecorderError, Result};

use super::WriterStream;

/// A gzip-compressed CSV stream, flushed by row count or elapsed time
/// (§4.6 "Buffering policy"). The header is written once, on open, and
/// never rewritten.
pub struct CsvGzWriter {
    stream: WriterStream,
    inner: csv::Writer<GzEncoder<BufWriter<File>>>,
    rows_since_flush: usize,
    last_flush: Instant,
    buffer_rows: usize,
    flush_interval: Duration,
}

impl CsvGzWriter {
    pub fn open(
        path: &Path,
        header: &[&str],
        stream: WriterStream,
        buffer_rows: usize,
        flush_interval: Duration,
    ) -> Result<Self> {
        let file = retry_disk_io(|| File::create(path))
            .map_err(|source| RecorderError::DiskIo { stream, source })?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut inner = csv::Writer::from_writer(encoder);
        inner.write_record(header).map_err(RecorderError::Csv)?;
        Ok(Self {
            stream,
            inner,
            rows_since_flush: 0,
            last_flush: Instant::now(),
            buffer_rows,
            flush_interval,
        })
    }

    /// Writes one row of exact decimal strings; never formats via float
    /// (§4.6 "Precision").
    pub fn write_row(&mut self, row: &[String]) -> Result<()> {
        self.inner.write_record(row).map_err(RecorderError::Csv)?;
        self.rows_since_flush += 1;
        if self.rows_since_flush >= self.buffer_rows
            || self.last_flush.elapsed() >= self.flush_interval
        {
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
        self.rows_since_flush = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Flushes and finalizes the gzip footer (§4.6 "gzip footer must be
    /// finalized on clean shutdown"). `GzEncoder::finish` consumes the
    /// encoder, so unlike `flush` there is nothing left to retry with —
    /// one attempt is all this step gets.
    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        let encoder = self
            .inner
            .into_inner()
            .map_err(|e| RecorderError::Decode(format!("csv writer teardown: {e}")))?;
        encoder
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
    fn writes_header_and_rows_and_finalizes_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("top_book.csv.gz");

        let mut writer = CsvGzWriter::open(
            &path,
            &["recv_seq", "price", "qty"],
            WriterStream::TopBook,
            2,
            Duration::from_secs(60),
        )
        .unwrap();
        writer
            .write_row(&["1".into(), "100.00".into(), "1.5".into()])
            .unwrap();
        writer
            .write_row(&["2".into(), "100.01".into(), "2.0".into()])
            .unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert!(out.starts_with("recv_seq,price,qty\n"));
        assert_eq!(out.lines().count(), 3);
    }
}
