use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure for taskforge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Stable identifier of this agent; namespaces every per-agent state file
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// Project root the agent works in
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,

    /// Queue root holding blocked/todo/doing/done, relative to `project_dir`
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,

    /// Lock, state, and log root, relative to `project_dir`
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Non-interactive operation: orphans are recovered without asking
    #[serde(default)]
    pub autonomous: bool,

    /// Resume an interrupted session found at startup
    #[serde(default = "default_true")]
    pub resume: bool,

    /// Pipeline phases run for every task, in order
    #[serde(default = "default_phases")]
    pub phases: Vec<String>,

    /// Lock manager configuration
    #[serde(default)]
    pub lock: LockConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Stagnation breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Agent subprocess configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_agent_id() -> String {
    "default".to_string()
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_tasks_dir() -> PathBuf {
    PathBuf::from("tasks")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".taskforge")
}

const fn default_true() -> bool {
    true
}

fn default_phases() -> Vec<String> {
    vec!["plan".to_string(), "implement".to_string(), "review".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            project_dir: default_project_dir(),
            tasks_dir: default_tasks_dir(),
            state_dir: default_state_dir(),
            autonomous: false,
            resume: true,
            phases: default_phases(),
            lock: LockConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            agent: AgentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Absolute-or-relative queue root.
    pub fn queue_root(&self) -> PathBuf {
        self.project_dir.join(&self.tasks_dir)
    }

    /// Absolute-or-relative state root.
    pub fn state_root(&self) -> PathBuf {
        self.project_dir.join(&self.state_dir)
    }

    /// Directory holding lock files and acquisition mutexes.
    pub fn locks_dir(&self) -> PathBuf {
        self.state_root().join("locks")
    }

    /// Directory holding this agent's private state files.
    pub fn agent_state_dir(&self) -> PathBuf {
        self.state_root().join("agents").join(&self.agent_id)
    }

    /// Root for per-session phase logs.
    pub fn logs_dir(&self) -> PathBuf {
        self.state_root().join("logs")
    }
}

/// Lock manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LockConfig {
    /// Age after which a lock is stale even if its holder looks alive
    #[serde(default = "default_lock_timeout_secs")]
    pub timeout_secs: u64,

    /// Interval between heartbeat refreshes of a held lock
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

const fn default_lock_timeout_secs() -> u64 {
    7200
}

const fn default_heartbeat_interval_secs() -> u64 {
    60
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_lock_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Disable to skip quota accounting entirely
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Agent invocations allowed per rolling hour
    #[serde(default = "default_calls_per_hour")]
    pub calls_per_hour: u32,

    /// Usage percentage at which a warning is emitted
    #[serde(default = "default_warn_threshold_pct")]
    pub warn_threshold_pct: u32,

    /// Seconds between status updates while blocked
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

const fn default_calls_per_hour() -> u32 {
    80
}

const fn default_warn_threshold_pct() -> u32 {
    80
}

const fn default_status_interval_secs() -> u64 {
    30
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            calls_per_hour: default_calls_per_hour(),
            warn_threshold_pct: default_warn_threshold_pct(),
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Attempts per phase before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in seconds
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    /// Upper bound for any single backoff, in seconds
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_secs() -> u64 {
    5
}

const fn default_max_delay_secs() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

/// Stagnation breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerConfig {
    /// Disable to let every iteration proceed
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// No-progress iterations before CLOSED moves to HALF_OPEN
    #[serde(default = "default_half_open_after")]
    pub half_open_after: u32,

    /// No-progress iterations before HALF_OPEN moves to OPEN
    #[serde(default = "default_no_progress_threshold")]
    pub no_progress_threshold: u32,

    /// Seconds an OPEN breaker waits before allowing a probe
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Identical failure signatures in a row that count as stagnation
    #[serde(default = "default_same_error_threshold")]
    pub same_error_threshold: u32,

    /// Failed iterations in a row that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Output below this percentage of the rolling average counts as decline
    #[serde(default = "default_output_decline_pct")]
    pub output_decline_pct: u32,

    /// Iterations kept in the output-size window
    #[serde(default = "default_output_window")]
    pub output_window: usize,

    /// Log lines hashed for the error signature
    #[serde(default = "default_error_tail_lines")]
    pub error_tail_lines: usize,
}

const fn default_half_open_after() -> u32 {
    2
}

const fn default_no_progress_threshold() -> u32 {
    3
}

const fn default_cooldown_secs() -> u64 {
    600
}

const fn default_same_error_threshold() -> u32 {
    5
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_output_decline_pct() -> u32 {
    70
}

const fn default_output_window() -> usize {
    5
}

const fn default_error_tail_lines() -> usize {
    20
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            half_open_after: default_half_open_after(),
            no_progress_threshold: default_no_progress_threshold(),
            cooldown_secs: default_cooldown_secs(),
            same_error_threshold: default_same_error_threshold(),
            failure_threshold: default_failure_threshold(),
            output_decline_pct: default_output_decline_pct(),
            output_window: default_output_window(),
            error_tail_lines: default_error_tail_lines(),
        }
    }
}

/// Agent subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Executable invoked for every phase
    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments placed before the model and prompt
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Flag used to pass the model identifier
    #[serde(default = "default_model_flag")]
    pub model_flag: String,

    /// Model used when a run starts
    #[serde(default = "default_model")]
    pub model: String,

    /// Weaker model to fall back to on quota/overload failures
    #[serde(default = "default_fallback_models")]
    pub fallback_models: HashMap<String, String>,

    /// Regular expressions that mark a failure as quota/overload related
    #[serde(default = "default_quota_signatures")]
    pub quota_signatures: Vec<String>,

    /// Per-phase wall-clock limit in seconds
    #[serde(default = "default_phase_timeout_secs")]
    pub phase_timeout_secs: u64,
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_args() -> Vec<String> {
    vec!["--print".to_string(), "--dangerously-skip-permissions".to_string()]
}

fn default_model_flag() -> String {
    "--model".to_string()
}

fn default_model() -> String {
    "opus".to_string()
}

fn default_fallback_models() -> HashMap<String, String> {
    HashMap::from([
        ("opus".to_string(), "sonnet".to_string()),
        ("sonnet".to_string(), "haiku".to_string()),
    ])
}

fn default_quota_signatures() -> Vec<String> {
    vec![
        r"(?i)rate.?limit".to_string(),
        r"(?i)usage limit".to_string(),
        r"(?i)quota".to_string(),
        r"(?i)overloaded".to_string(),
        r"\b(429|529)\b".to_string(),
    ]
}

const fn default_phase_timeout_secs() -> u64 {
    3600
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            model_flag: default_model_flag(),
            model: default_model(),
            fallback_models: default_fallback_models(),
            quota_signatures: default_quota_signatures(),
            phase_timeout_secs: default_phase_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Also write JSON logs under `<state_dir>/logs/`
    #[serde(default)]
    pub file: bool,

    /// Rotation for the file output: daily, hourly, or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: false,
            rotation: default_rotation(),
        }
    }
}
