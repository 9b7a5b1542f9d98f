use nix::errno::Errno;
use thiserror::Error;

/// Errors from creating, opening, or probing a ring segment.
///
/// A segment that simply does not exist (or whose writer is gone) is not an
/// error; [`Reader::open`](crate::Reader::open) reports that as `Ok(None)`.
#[derive(Debug, Error)]
pub enum RingError {
    /// Requested ring capacity is unusable.
    #[error("ring capacity {0} is not a nonzero power of two")]
    InvalidCapacity(usize),

    /// `shm_open`/`shm_unlink` on the named segment failed.
    #[error("shm '{name}': {source}")]
    Shm { name: String, source: Errno },

    /// The mapped segment does not match its own header geometry.
    #[error("segment '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },

    /// Probing the writer process failed with something other than
    /// ESRCH/EPERM.
    #[error("probing writer pid {pid}: {source}")]
    Liveness { pid: i64, source: Errno },

    /// Sizing or mapping the backing object failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
