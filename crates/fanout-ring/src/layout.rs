//! In-segment layout shared by the writer and reader sides.

use std::sync::atomic::{AtomicI64, AtomicU64};

/// Size of the segment header in bytes. The ring region starts here and must
/// stay 16-byte aligned.
pub(crate) const HEADER_SIZE: usize = 32;

/// Bytes occupied by a slot's size field plus padding, so that every payload
/// is 16-byte aligned within the segment.
pub(crate) const SLOT_PREFIX: usize = 16;

/// Segment header, mapped at offset zero.
///
/// `#[repr(C)]` so that independently built writer and reader binaries agree
/// on the layout. The two plain fields are immutable once `writer_pid` has
/// been published; the atomics are the only cross-process mutable state.
#[repr(C)]
pub(crate) struct SegmentHeader {
    /// Usable ring bytes; power of two. Cursor positions are taken modulo
    /// this value.
    pub capacity: u64,

    /// Upper bound on one slot (prefix included), multiple of 16. The ring
    /// region is oversized by this amount so slots never wrap mid-payload.
    pub max_slot_size: u64,

    /// Bytes published since init. Stored only by the writer, with release
    /// ordering; loaded by readers with acquire ordering.
    pub writer_cursor: AtomicU64,

    /// Pid of the writing process. Zero until init completes and again after
    /// a clean shutdown; published last, with release ordering.
    pub writer_pid: AtomicI64,
}

const _: () = assert!(std::mem::size_of::<SegmentHeader>() == HEADER_SIZE);
const _: () = assert!(HEADER_SIZE % 16 == 0);

/// Round up to the next multiple of 16 (slot granularity).
pub(crate) fn round_up_16(n: u64) -> u64 {
    (n + 15) & !15
}
