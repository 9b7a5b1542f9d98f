//! The size/timestamp record format.
//!
//! Every packet, in shared memory and on disk, is prefixed with one
//! little-endian 64-bit word: the low 16 bits carry the payload size in
//! bytes, the high 48 bits the unix receive time in 16-microsecond ticks.
//! On disk, records are padded with zeros to the next 8-byte boundary so
//! headers stay aligned, and an all-zero word read where a header was
//! expected is padding to be skipped, never a record.

use std::io::{ErrorKind, Read};

/// Bytes of the record header.
pub const HEADER_LEN: usize = 8;

/// Round up to the on-disk record granularity.
pub fn round_up_8(n: usize) -> usize {
    (n + 7) & !7
}

/// Decoded form of the 8-byte record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingHeader {
    /// Payload size in bytes, header not included.
    pub size: u16,
    /// Unix time in 16-microsecond ticks.
    pub ticks: u64,
}

impl LoggingHeader {
    /// Stamp a payload size with a receive time in unix microseconds.
    ///
    /// The timestamp is quantized to 16 µs; times past 2^48 ticks (the year
    /// 2112) would truncate.
    pub fn new(size: u16, unix_micros: u64) -> Self {
        Self {
            size,
            ticks: unix_micros / 16,
        }
    }

    /// Receive time back in unix microseconds (16 µs resolution).
    pub fn unix_micros(&self) -> u64 {
        self.ticks * 16
    }

    /// Payload length as stored on disk, zero-padded to 8 bytes.
    pub fn padded_len(&self) -> usize {
        round_up_8(self.size as usize)
    }

    pub fn to_bits(self) -> u64 {
        (self.ticks << 16) | u64::from(self.size)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            size: bits as u16,
            ticks: bits >> 16,
        }
    }

    pub fn encode(self) -> [u8; HEADER_LEN] {
        self.to_bits().to_le_bytes()
    }

    pub fn decode(bytes: [u8; HEADER_LEN]) -> Self {
        Self::from_bits(u64::from_le_bytes(bytes))
    }
}

/// Scanner for the on-disk record concatenation.
///
/// Reads 8 bytes, extracts the size, reads `round_up_8(size)` more, and
/// hands back the payload with the padding stripped. All-zero header words
/// between records are skipped. A stream that ends mid-record is treated as
/// ending cleanly: chunk files cut off by a crash stay readable up to the
/// last whole record.
pub struct RecordReader<R> {
    inner: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// The next record, or `Ok(None)` once the stream is exhausted.
    pub fn next_record(&mut self) -> std::io::Result<Option<(LoggingHeader, Vec<u8>)>> {
        let mut word = [0u8; HEADER_LEN];
        let header = loop {
            match self.inner.read_exact(&mut word) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e),
            }
            if word != [0u8; HEADER_LEN] {
                break LoggingHeader::decode(word);
            }
        };

        let mut payload = vec![0u8; header.padded_len()];
        match self.inner.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        payload.truncate(header.size as usize);

        Ok(Some((header, payload)))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = std::io::Result<(LoggingHeader, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
