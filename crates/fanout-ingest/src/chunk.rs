//! Ten-second chunk files.
//!
//! Completed chunks are meant to be picked up by an external process (the
//! deployment pipes completed paths into a compressor), so rollover is
//! packet-aligned rather than time-aligned: a file ends at the last packet
//! whose timestamp falls inside its ten-second bucket, and buckets in which
//! nothing arrived produce no file at all.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::DateTime;
use fanout_wire::record::round_up_8;

const BUCKET_MICROS: u64 = 10_000_000;

struct Chunk {
    file: BufWriter<File>,
    path: PathBuf,
    /// Ten-second bucket of the packet that opened the file.
    bucket: u64,
}

/// Appends framed records to at most one open file, rolling over on
/// ten-second boundaries.
///
/// Per packet, the caller drives three steps in order: [`roll`](Self::roll)
/// (which may hand back a completed path to announce), then
/// [`ensure_open`](Self::ensure_open), then, after the packet has been
/// published to realtime readers, [`append_record`](Self::append_record).
/// The split keeps the completed-path announcement ahead of the next file's
/// creation, which downstream tooling relies on.
pub struct ChunkWriter {
    dir: PathBuf,
    current: Option<Chunk>,
}

impl ChunkWriter {
    /// Stage chunk files in `dir`.
    ///
    /// The directory should be fast, volatile storage (tmpfs); a completed
    /// chunk is moved to its final home by whatever consumes the completed
    /// path stream.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: None,
        }
    }

    /// Close the current file if `packet_micros` falls past its bucket.
    ///
    /// Returns the completed file's path for the caller to emit. No file
    /// open, or a packet still inside the bucket, is `Ok(None)`.
    pub fn roll(&mut self, packet_micros: u64) -> std::io::Result<Option<PathBuf>> {
        let bucket = packet_micros - packet_micros % BUCKET_MICROS;
        match self.current.take() {
            Some(mut chunk) if bucket > chunk.bucket => {
                chunk.file.flush()?;
                Ok(Some(chunk.path))
            }
            still_current => {
                self.current = still_current;
                Ok(None)
            }
        }
    }

    /// Create the next file if none is open, named after `packet_micros`
    /// rounded down to whole seconds: `<dir>/<iso8601_utc>.bin`.
    pub fn ensure_open(&mut self, packet_micros: u64) -> std::io::Result<()> {
        if self.current.is_some() {
            return Ok(());
        }

        let seconds = (packet_micros / 1_000_000) as i64;
        let stamp = DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("packet time {packet_micros} us is not representable"),
                )
            })?
            .format("%Y%m%dT%H%M%SZ");

        let path = self.dir.join(format!("{stamp}.bin"));
        let file = BufWriter::new(File::create(&path)?);
        self.current = Some(Chunk {
            file,
            path,
            bucket: packet_micros - packet_micros % BUCKET_MICROS,
        });
        Ok(())
    }

    /// Append one record (logging header plus payload), zero-padded to the
    /// 8-byte record granularity. A write failure here is fatal to the
    /// ingest process; the caller propagates it.
    pub fn append_record(&mut self, record: &[u8]) -> std::io::Result<()> {
        let Some(chunk) = self.current.as_mut() else {
            return Ok(());
        };
        chunk.file.write_all(record)?;
        let padding = round_up_8(record.len()) - record.len();
        chunk.file.write_all(&[0u8; 7][..padding])?;
        Ok(())
    }

    /// Close any open file at shutdown and hand back its path.
    pub fn finish(&mut self) -> std::io::Result<Option<PathBuf>> {
        match self.current.take() {
            Some(mut chunk) => {
                chunk.file.flush()?;
                Ok(Some(chunk.path))
            }
            None => Ok(None),
        }
    }

    /// Directory chunk files are staged in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_wire::{LoggingHeader, RecordReader};

    fn record(payload: &[u8], micros: u64) -> Vec<u8> {
        let mut bytes = LoggingHeader::new(payload.len() as u16, micros)
            .encode()
            .to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    fn read_chunk(path: &Path) -> Vec<Vec<u8>> {
        RecordReader::new(File::open(path).unwrap())
            .map(|r| r.unwrap().1)
            .collect()
    }

    #[test]
    fn rollover_splits_on_the_ten_second_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunks = ChunkWriter::new(dir.path());

        // 9.9 s: opens the first file.
        assert!(chunks.roll(9_900_000).unwrap().is_none());
        chunks.ensure_open(9_900_000).unwrap();
        chunks.append_record(&record(b"first", 9_900_000)).unwrap();

        // 10.0 s: next bucket, so the first file completes before the
        // second is created.
        let done = chunks.roll(10_000_000).unwrap().expect("bucket advanced");
        assert_eq!(done.file_name().unwrap(), "19700101T000009Z.bin");
        chunks.ensure_open(10_000_000).unwrap();
        chunks.append_record(&record(b"second", 10_000_000)).unwrap();

        // 10.1 s: same bucket, same file.
        assert!(chunks.roll(10_100_000).unwrap().is_none());
        chunks.ensure_open(10_100_000).unwrap();
        chunks.append_record(&record(b"third", 10_100_000)).unwrap();

        let last = chunks.finish().unwrap().expect("second file was open");
        assert_eq!(last.file_name().unwrap(), "19700101T000010Z.bin");

        assert_eq!(read_chunk(&done), vec![b"first".to_vec()]);
        assert_eq!(
            read_chunk(&last),
            vec![b"second".to_vec(), b"third".to_vec()]
        );
    }

    #[test]
    fn empty_buckets_produce_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunks = ChunkWriter::new(dir.path());

        chunks.ensure_open(5_000_000).unwrap();
        chunks.append_record(&record(b"x", 5_000_000)).unwrap();

        // Next packet lands four buckets later; nothing exists in between.
        let done = chunks.roll(45_000_000).unwrap().expect("bucket advanced");
        chunks.ensure_open(45_000_000).unwrap();
        chunks.append_record(&record(b"y", 45_000_000)).unwrap();
        let last = chunks.finish().unwrap().unwrap();

        assert_eq!(
            std::fs::read_dir(dir.path()).unwrap().count(),
            2,
            "only the two buckets that saw packets have files"
        );
        assert_eq!(read_chunk(&done), vec![b"x".to_vec()]);
        assert_eq!(read_chunk(&last), vec![b"y".to_vec()]);
    }

    #[test]
    fn records_are_padded_to_eight_bytes_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunks = ChunkWriter::new(dir.path());

        chunks.ensure_open(0).unwrap();
        chunks.append_record(&record(b"abc", 0)).unwrap();
        chunks.append_record(&record(b"defghijk", 16)).unwrap();
        let path = chunks.finish().unwrap().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // 8 + pad8(3) = 16, then 8 + 8 = 16.
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[8..11], b"abc");
        assert_eq!(&bytes[11..16], &[0u8; 5]);
    }

    #[test]
    fn finish_with_nothing_open_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunks = ChunkWriter::new(dir.path());
        assert!(chunks.finish().unwrap().is_none());
        assert!(chunks.roll(1_000_000).unwrap().is_none());
    }

    #[test]
    fn missing_directory_fails_the_open() {
        let mut chunks = ChunkWriter::new("/nonexistent-staging-dir");
        assert!(chunks.ensure_open(0).is_err());
    }
}
