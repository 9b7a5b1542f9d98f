//! Reader side: attach, poll, and lap detection.

use std::fs::File;
use std::sync::atomic::{fence, Ordering};

use memmap2::{Mmap, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::shm_open;
use nix::sys::stat::Mode;

use crate::error::RingError;
use crate::layout::{round_up_16, SegmentHeader, HEADER_SIZE, SLOT_PREFIX};
use crate::liveness::process_exists;

/// One non-blocking poll of the ring.
#[derive(Debug)]
pub enum Recv<'a> {
    /// Caught up with the writer; nothing new. Sleep and poll again.
    Empty,
    /// The writer overran this reader's position; the in-progress view is
    /// untrusted and must be discarded. Recover with
    /// [`Reader::resync`].
    Lapped,
    /// The next payload, zero-copy out of the shared mapping.
    Packet(&'a [u8]),
}

/// A read-only handle onto a ring segment.
///
/// Each reader is independent: it holds its own mapping and its own cursor,
/// and never writes to the segment. A freshly opened reader starts at the
/// writer's current position, so it observes only packets published after
/// the open.
///
/// Polling is non-blocking. The intended loop:
///
/// ```no_run
/// # use fanout_ring::{Reader, Recv};
/// # fn process(_p: &[u8]) -> u64 { 0 }
/// # fn demo() -> Result<(), fanout_ring::RingError> {
/// let mut reader = match Reader::open("/sensor_feed")? {
///     Some(reader) => reader,
///     None => return Ok(()), // no active writer
/// };
/// loop {
///     let derived = match reader.recv() {
///         Recv::Packet(payload) => Some(process(payload)), // zero-copy view
///         Recv::Lapped | Recv::Empty => None,
///     };
///     if let Some(result) = derived {
///         // Validate before forwarding anything derived from the payload:
///         // the writer may have lapped us mid-read.
///         if reader.has_kept_up() {
///             println!("{result}");
///             continue;
///         }
///     } else if reader.eof()? {
///         break;
///     }
///     // Lapped (or overwritten mid-read): jump forward. A no-op when we
///     // were merely caught up.
///     reader.resync();
///     std::thread::sleep(std::time::Duration::from_millis(2));
/// }
/// # Ok(())
/// # }
/// ```
pub struct Reader {
    name: String,
    mmap: Mmap,
    cursor: u64,
    capacity: u64,
    max_slot_size: u64,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Reader {
    /// Attach to the named segment read-only.
    ///
    /// Returns `Ok(None)` when there is nothing to attach to: the segment
    /// does not exist, its writer has not finished initializing or has shut
    /// down cleanly (pid zero), or the recorded writer process is gone.
    /// Callers treat all of those the same way.
    pub fn open(name: &str) -> Result<Option<Self>, RingError> {
        let fd = match shm_open(name, OFlag::O_RDONLY, Mode::empty()) {
            Ok(fd) => fd,
            Err(Errno::ENOENT) => return Ok(None),
            Err(source) => {
                return Err(RingError::Shm {
                    name: name.to_string(),
                    source,
                })
            }
        };

        let file = File::from(fd);
        let mapped_len = file.metadata()?.len() as usize;
        if mapped_len < HEADER_SIZE {
            return Err(RingError::Malformed {
                name: name.to_string(),
                reason: format!("{mapped_len} bytes is smaller than the segment header"),
            });
        }

        // SAFETY: mapping a file we just opened, for its stat'd length.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        // SAFETY: the mapping is at least HEADER_SIZE bytes; SegmentHeader
        // is repr(C) at offset 0 and we only ever read through this ref.
        let header = unsafe { &*(mmap.as_ptr() as *const SegmentHeader) };

        // The pid is published last during init, so it must be loaded first:
        // the acquire pairs with the writer's release and makes the rest of
        // the header trustworthy.
        let pid = header.writer_pid.load(Ordering::Acquire);
        if pid == 0 {
            return Ok(None);
        }
        match process_exists(pid) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(source) => return Err(RingError::Liveness { pid, source }),
        }

        let capacity = header.capacity;
        let max_slot_size = header.max_slot_size;
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(RingError::Malformed {
                name: name.to_string(),
                reason: format!("capacity {capacity} is not a power of two"),
            });
        }
        let expected_len = HEADER_SIZE as u64 + capacity + max_slot_size;
        if mapped_len as u64 != expected_len {
            return Err(RingError::Malformed {
                name: name.to_string(),
                reason: format!("mapped {mapped_len} bytes, header implies {expected_len}"),
            });
        }

        // Start at the writer's position: only future packets are for us.
        let cursor = header.writer_cursor.load(Ordering::Acquire);

        Ok(Some(Self {
            name: name.to_string(),
            mmap,
            cursor,
            capacity,
            max_slot_size,
        }))
    }

    fn header(&self) -> &SegmentHeader {
        // SAFETY: mapped length was validated against the header geometry in
        // `open`; the mapping outlives self.
        unsafe { &*(self.mmap.as_ptr() as *const SegmentHeader) }
    }

    /// Poll for the next packet. Never blocks.
    ///
    /// The slot's size field is read before we know whether the writer has
    /// overrun us, so the writer cursor is re-loaded afterwards and the size
    /// only trusted if the slot's prefix is still outside the writer's
    /// active window. [`Recv::Lapped`] means this reader fell at least a
    /// full ring behind.
    pub fn recv(&mut self) -> Recv<'_> {
        let writer_cursor = self.header().writer_cursor.load(Ordering::Acquire);
        if writer_cursor == self.cursor {
            return Recv::Empty;
        }

        let slot_offset = HEADER_SIZE + (self.cursor % self.capacity) as usize;
        // SAFETY: slot_offset is 16-byte aligned and in bounds (the ring
        // region is oversized by max_slot_size). The writer may be storing
        // to these bytes concurrently; the revalidation below decides
        // whether the value read here can be trusted.
        let size =
            unsafe { (self.mmap.as_ptr().add(slot_offset) as *const u64).read_volatile() };

        // Keep the size read from sinking below the cursor re-load.
        fence(Ordering::SeqCst);

        // The writer may be mutating any byte of [w, w + max_slot_size).
        // The size field spans [r, r + SLOT_PREFIX), which the writer next
        // touches at absolute position r + capacity, so it is intact iff
        // w + max_slot_size <= r + SLOT_PREFIX + capacity.
        let writer_cursor = self.header().writer_cursor.load(Ordering::Acquire);
        let lag_past_prefix = writer_cursor
            .wrapping_sub(self.cursor)
            .wrapping_sub(SLOT_PREFIX as u64);
        if lag_past_prefix.wrapping_add(self.max_slot_size) > self.capacity {
            return Recv::Lapped;
        }

        self.cursor = self
            .cursor
            .wrapping_add(round_up_16(SLOT_PREFIX as u64 + size));

        let payload_offset = slot_offset + SLOT_PREFIX;
        Recv::Packet(&self.mmap[payload_offset..payload_offset + size as usize])
    }

    /// Whether the payload most recently returned by [`recv`](Self::recv)
    /// was still intact when it was consumed.
    ///
    /// Call this after reading the payload and before forwarding anything
    /// derived from it: a false result means the writer may have overwritten
    /// the bytes mid-read and the derived work must be discarded.
    pub fn has_kept_up(&self) -> bool {
        // Order the caller's payload reads before the cursor load.
        fence(Ordering::SeqCst);
        let writer_cursor = self.header().writer_cursor.load(Ordering::Acquire);
        let lag = writer_cursor.wrapping_sub(self.cursor);
        // The writer may currently be filling a maximum-size slot.
        lag.wrapping_add(self.max_slot_size) <= self.capacity
    }

    /// Jump to the writer's current position, discarding everything between.
    ///
    /// This is the recovery step after [`Recv::Lapped`] or a false
    /// [`has_kept_up`](Self::has_kept_up); subsequent packets arrive intact.
    pub fn resync(&mut self) {
        self.cursor = self.header().writer_cursor.load(Ordering::Acquire);
    }

    /// Whether the writer is gone for good.
    ///
    /// True on clean shutdown (pid zero) or when the recorded process no
    /// longer exists. A writer owned by another user probes as alive.
    /// Callers typically check this after some interval of [`Recv::Empty`]
    /// polls and close down on true.
    pub fn eof(&self) -> Result<bool, RingError> {
        let pid = self.header().writer_pid.load(Ordering::Acquire);
        if pid == 0 {
            return Ok(true);
        }
        match process_exists(pid) {
            Ok(alive) => Ok(!alive),
            Err(source) => Err(RingError::Liveness { pid, source }),
        }
    }

    /// Segment name this reader attached to.
    pub fn name(&self) -> &str {
        &self.name
    }
}
