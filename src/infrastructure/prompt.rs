//! Operator prompts for orphan recovery.

use console::{style, Term};
use tracing::warn;

use crate::domain::ports::RecoveryPrompt;

/// Asks on the controlling terminal. Without a terminal the answer is no.
#[derive(Debug, Clone)]
pub struct TerminalPrompt {
    term: Term,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self { term: Term::stderr() }
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryPrompt for TerminalPrompt {
    fn confirm(&self, question: &str) -> bool {
        if !self.term.is_term() {
            warn!("no terminal to confirm orphan recovery, leaving task in place");
            return false;
        }
        if self
            .term
            .write_str(&format!("{} {} [y/N] ", style("?").yellow().bold(), question))
            .is_err()
        {
            return false;
        }
        self.term
            .read_line()
            .map(|answer| parse_answer(&answer))
            .unwrap_or(false)
    }
}

/// Approves every recovery; used with `--yes` and in autonomous runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl RecoveryPrompt for AutoApprove {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_explicit_yes_confirms() {
        assert!(parse_answer("y"));
        assert!(parse_answer(" YES \n"));
        assert!(!parse_answer(""));
        assert!(!parse_answer("n"));
        assert!(!parse_answer("yep"));
    }

    #[test]
    fn test_auto_approve() {
        assert!(AutoApprove.confirm("anything?"));
    }
}
