pub mod circuit;
pub mod config;
pub mod kv;
pub mod lock;
pub mod session;
pub mod task;

pub use circuit::{CircuitRecord, CircuitState};
pub use config::{
    AgentConfig, CircuitBreakerConfig, Config, LockConfig, LoggingConfig, RateLimitConfig,
    RetryConfig,
};
pub use kv::KvRecord;
pub use lock::LockRecord;
pub use session::{HealthRecord, SessionRecord, SessionStatus};
pub use task::{Task, TaskId, TaskLocation};
