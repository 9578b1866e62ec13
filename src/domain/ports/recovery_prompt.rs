/// Operator confirmation for orphan recovery.
pub trait RecoveryPrompt: Send + Sync {
    /// Returns `true` if the operator approves `question`.
    fn confirm(&self, question: &str) -> bool;
}
