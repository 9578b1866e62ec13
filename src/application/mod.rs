//! Use-case orchestration: the per-run context, the retry executor, and the
//! outer run loop.

pub mod context;
pub mod retry_executor;
pub mod run_loop;

pub use context::{Adapters, OrchestrationContext};
pub use retry_executor::{backoff, run_with_retry, ExecutorError};
pub use run_loop::{install_signal_handlers, run, RunOutcome, RunSummary};
