//! Writer side: segment creation and zero-copy publication.

use std::fs::File;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::Pid;

use crate::error::RingError;
use crate::layout::{round_up_16, SegmentHeader, HEADER_SIZE, SLOT_PREFIX};

/// The writing side of a ring segment.
///
/// There is exactly one writer per segment name. Creating a writer unlinks
/// any stale segment with the same name and recreates it from scratch;
/// dropping the writer marks the segment closed for all readers.
///
/// Publication is a two-step, zero-copy protocol:
///
/// ```no_run
/// # fn demo() -> Result<(), fanout_ring::RingError> {
/// let mut writer = fanout_ring::Writer::create("/sensor_feed", 1 << 22, 65528)?;
/// let slot = writer.slot();
/// slot[..4].copy_from_slice(b"ping");
/// writer.publish(4);
/// # Ok(())
/// # }
/// ```
pub struct Writer {
    name: String,
    mmap: MmapMut,
    /// Private mirror of the shared cursor; this process is its only mutator.
    cursor: u64,
    capacity: u64,
    max_slot_size: u64,
    max_packet_size: usize,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("max_packet_size", &self.max_packet_size)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Writer {
    /// Create (or recreate) the named segment and become its writer.
    ///
    /// `name` must start with `/`, per `shm_open(3)`. `capacity` is the
    /// usable ring size in bytes and must be a nonzero power of two.
    /// `max_packet_size` bounds a single publication; the per-slot reserve
    /// is rounded up so that slots stay 16-byte aligned.
    ///
    /// The segment only becomes visible to [`Reader::open`](crate::Reader::open)
    /// at the very end, when the writer's pid is published.
    pub fn create(
        name: &str,
        capacity: usize,
        max_packet_size: usize,
    ) -> Result<Self, RingError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(RingError::InvalidCapacity(capacity));
        }

        let max_slot_size = round_up_16((SLOT_PREFIX + max_packet_size) as u64) as usize;
        let total_size = HEADER_SIZE + capacity + max_slot_size;

        // A leftover segment from a previous run is stale by definition.
        let _ = shm_unlink(name);

        let fd = shm_open(
            name,
            OFlag::O_RDWR | OFlag::O_CREAT,
            Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH,
        )
        .map_err(|source| RingError::Shm {
            name: name.to_string(),
            source,
        })?;

        let file = File::from(fd);
        file.set_len(total_size as u64)?;

        // SAFETY: we just created the object and sized it; the mapping is
        // backed for its whole length.
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        debug_assert!(mmap.len() >= total_size);

        let header = mmap.as_mut_ptr() as *mut SegmentHeader;
        // SAFETY: the mapping is at least HEADER_SIZE bytes and exclusively
        // ours until the pid below is published.
        unsafe {
            (*header).capacity = capacity as u64;
            (*header).max_slot_size = max_slot_size as u64;
            (*header).writer_cursor = AtomicU64::new(0);
            (*header).writer_pid = AtomicI64::new(0);
        }

        let writer = Self {
            name: name.to_string(),
            mmap,
            cursor: 0,
            capacity: capacity as u64,
            max_slot_size: max_slot_size as u64,
            max_packet_size,
        };

        // Publishing the pid is what makes the segment joinable; it must be
        // the last store of initialization.
        let pid = Pid::this().as_raw() as i64;
        writer.header().writer_pid.store(pid, Ordering::Release);
        tracing::info!(name, capacity, max_packet_size, "ring segment created");

        Ok(writer)
    }

    fn header(&self) -> &SegmentHeader {
        // SAFETY: the mapping is HEADER_SIZE + capacity + max_slot_size
        // bytes and outlives self; SegmentHeader is repr(C) at offset 0.
        unsafe { &*(self.mmap.as_ptr() as *const SegmentHeader) }
    }

    /// The payload region of the current slot, `max_packet_size` bytes long.
    ///
    /// Does not touch any shared state: calling `slot` repeatedly without an
    /// intervening [`publish`](Self::publish) hands back the same region.
    /// The tail oversizing guarantees the region is contiguous even when the
    /// slot begins near the wrap point.
    pub fn slot(&mut self) -> &mut [u8] {
        let offset = HEADER_SIZE + (self.cursor % self.capacity) as usize + SLOT_PREFIX;
        &mut self.mmap[offset..offset + self.max_packet_size]
    }

    /// Publish the first `len` bytes of the current slot to all readers.
    ///
    /// Writes the slot's size field, then advances the shared cursor with
    /// release ordering; the slot contents become visible to readers only
    /// through that store. `len` must not exceed `max_packet_size`.
    ///
    /// Returns the published bytes, so the caller can hand the exact shared
    /// view to a logger without copying. The view is stable from this
    /// process's perspective until the writer wraps back around to the slot.
    pub fn publish(&mut self, len: usize) -> &[u8] {
        assert!(len <= self.max_packet_size, "slot overrun: {len} bytes");

        let slot_offset = HEADER_SIZE + (self.cursor % self.capacity) as usize;
        // SAFETY: slot_offset + SLOT_PREFIX is within the mapping (the ring
        // region is oversized by max_slot_size), and the offset is 16-byte
        // aligned, so the u64 store is aligned. No reader trusts these bytes
        // until the release store below.
        unsafe {
            let size_field = self.mmap.as_mut_ptr().add(slot_offset) as *mut u64;
            size_field.write(len as u64);
        }

        let advance = round_up_16((SLOT_PREFIX + len) as u64);
        debug_assert!(advance <= self.max_slot_size);
        self.cursor = self.cursor.wrapping_add(advance);
        self.header()
            .writer_cursor
            .store(self.cursor, Ordering::Release);

        let payload_offset = slot_offset + SLOT_PREFIX;
        &self.mmap[payload_offset..payload_offset + len]
    }

    /// Total bytes published since creation (the shared cursor's value).
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Segment name this writer created.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Usable ring capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Largest payload a single [`publish`](Self::publish) may carry.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Tell readers no more data is coming, then unmap.
    ///
    /// Readers that are mid-`recv` may still observe final packets before
    /// they observe the shutdown; both orderings are fine. The backing
    /// object is left linked so late readers get a clean "writer gone"
    /// rather than "no such segment"; the next `create` unlinks it.
    pub fn close(self) {}
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.header().writer_pid.store(0, Ordering::Release);
        tracing::info!(name = %self.name, "ring segment closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_name(tag: &str) -> String {
        format!("/fanout_test_{}_{}", tag, std::process::id())
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        assert!(matches!(
            Writer::create(&segment_name("cap0"), 0, 256),
            Err(RingError::InvalidCapacity(0))
        ));
        assert!(matches!(
            Writer::create(&segment_name("cap3000"), 3000, 256),
            Err(RingError::InvalidCapacity(3000))
        ));
    }

    #[test]
    fn cursor_advances_by_padded_slot_size() {
        let name = segment_name("advance");
        let mut writer = Writer::create(&name, 4096, 256).unwrap();
        assert_eq!(writer.cursor(), 0);

        writer.slot()[..2].copy_from_slice(&[1, 2]);
        writer.publish(2);
        // 16-byte prefix + 2 payload bytes, rounded up to 32.
        assert_eq!(writer.cursor(), 32);

        writer.publish(16);
        assert_eq!(writer.cursor(), 64);

        writer.publish(17);
        assert_eq!(writer.cursor(), 112);

        let _ = shm_unlink(name.as_str());
    }

    #[test]
    fn odd_max_packet_size_keeps_slot_granularity() {
        let name = segment_name("odd");
        let mut writer = Writer::create(&name, 1 << 20, 65528).unwrap();
        writer.publish(65528);
        assert_eq!(writer.cursor() % 16, 0);
        let _ = shm_unlink(name.as_str());
    }
}
