/// Answers whether a process id still belongs to a running process.
///
/// Kept behind a trait so the lock manager never issues a syscall directly.
pub trait ProcessLiveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}
