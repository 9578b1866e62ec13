//! Process liveness checks for lock holders.

use crate::domain::ports::ProcessLiveness;

/// Liveness via `kill(pid, 0)`.
///
/// `EPERM` means the process exists but belongs to someone else, which still
/// counts as alive. Only `ESRCH` proves the holder is gone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProbe;

#[cfg(unix)]
impl ProcessLiveness for SignalProbe {
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        match kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(not(unix))]
impl ProcessLiveness for SignalProbe {
    // Without a portable probe, staleness falls back to lock age alone.
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}
