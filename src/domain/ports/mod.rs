//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces the orchestration core depends on:
//! - ProcessLiveness: is a recorded lock holder still running
//! - PhaseRunner: invoke the external agent for one pipeline phase
//! - ChangeDetector: did the working tree change since the last baseline
//! - RecoveryPrompt: ask an operator before moving an orphan
//!
//! Services only see these traits, so tests substitute scripted fakes.

pub mod change_detector;
pub mod phase_runner;
pub mod process_liveness;
pub mod recovery_prompt;

pub use change_detector::ChangeDetector;
pub use phase_runner::{PhaseRequest, PhaseResult, PhaseRunner, TIMEOUT_EXIT_CODE};
pub use process_liveness::ProcessLiveness;
pub use recovery_prompt::RecoveryPrompt;
