//! Orchestration services built on the domain ports.

pub mod circuit_breaker;
pub mod lock_manager;
pub mod model_fallback;
pub mod rate_limiter;
pub mod session_service;
pub mod task_queue;
pub mod task_selector;
pub mod wait;

pub use circuit_breaker::{CircuitBreaker, Gate, IterationReport, StagnationSignal};
pub use lock_manager::{LockHeartbeat, LockManager, LockStatus, StaleReason};
pub use model_fallback::ModelSelector;
pub use rate_limiter::{RateDecision, RateLimitError, RateLimiter};
pub use session_service::SessionService;
pub use task_queue::TaskQueue;
pub use task_selector::{Orphan, OrphanKind, RecoveryOutcome, TaskSelector};
pub use wait::{countdown, Interrupted};
