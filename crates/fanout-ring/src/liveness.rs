//! Signal-free existence check for the writer process.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Probe whether a process exists by sending it signal 0.
///
/// `EPERM` means the process exists but belongs to another user, which for
/// liveness purposes is "alive". Any errno other than ESRCH/EPERM is
/// surfaced to the caller.
pub fn process_exists(pid: i64) -> Result<bool, Errno> {
    match kill(Pid::from_raw(pid as nix::libc::pid_t), None) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(Errno::EPERM) => Ok(true),
        Err(e) => Err(e),
    }
}
