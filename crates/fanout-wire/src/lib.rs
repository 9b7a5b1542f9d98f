//! Wire formats for the serial fanout pipeline.
//!
//! Two layers live here. [`cobs`] strips the on-wire framing: datagrams
//! arrive over the serial line as zero-terminated COBS frames, and the
//! decoder turns the byte stream back into payloads. [`record`] is the
//! format everything downstream speaks: the 8-byte logging header
//! (payload size plus a 16-microsecond-resolution receive time) that is
//! prepended to every packet in shared memory and on disk, and the scanner
//! for reading the on-disk concatenation back.

pub mod cobs;
pub mod record;

pub use cobs::read_frame;
pub use record::{round_up_8, LoggingHeader, RecordReader, HEADER_LEN};
