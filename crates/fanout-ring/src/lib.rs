#![allow(unsafe_code)]
//! Lock-free single-writer, multi-reader ring buffer in POSIX shared memory.
//!
//! The use case is one writer process and zero or more reader processes on
//! the same machine, with zero-copy, fire-and-forget semantics: a slow,
//! misbehaving, or crashed reader can never block the writer or any other
//! reader. Think UDP multicast to localhost, minus the copies.
//!
//! # Architecture
//!
//! The segment is a named POSIX shared-memory object (a leading-`/` name
//! under `/dev/shm`). It starts with a small fixed header (geometry, the
//! writer's cursor, and the writer's pid) followed by the ring region. The
//! ring region is oversized by one maximum slot so that every slot is
//! contiguous in virtual memory and no slot ever straddles the wrap point.
//!
//! Both cursors are monotonically increasing byte counts; positions within
//! the ring are always `cursor % capacity`. Capacity must be a power of two.
//!
//! # Synchronization
//!
//! The writer fills a slot (size field, payload, padding) and then publishes
//! it with a release-ordered store of its cursor; readers load the cursor
//! with acquire ordering. There is no backpressure and no reader
//! registration: each [`Reader`] keeps a private cursor and detects being
//! lapped after the fact. The writer's pid doubles as the liveness signal:
//! zero means clean shutdown, and a pid that no longer exists means a crash.
//!
//! Both shared atomics must be lock-free at the machine level; a
//! mutex-emulated atomic would deadlock across processes if a reader died
//! mid-operation.

#[cfg(not(target_has_atomic = "64"))]
compile_error!("cross-process cursors require lock-free 64-bit atomics");

mod error;
mod layout;
mod liveness;
mod reader;
mod writer;

pub use error::RingError;
pub use liveness::process_exists;
pub use reader::{Reader, Recv};
pub use writer::Writer;
