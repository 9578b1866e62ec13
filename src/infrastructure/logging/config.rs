use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::models::{Config, LoggingConfig};

/// Resolved logger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Stderr format
    pub format: LogFormat,

    /// Directory for JSON log files; stderr only when `None`
    pub log_dir: Option<PathBuf>,

    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl LogConfig {
    /// Settings for `config`; file output lands in `<state_dir>/logs/`.
    pub fn from_config(config: &Config) -> Self {
        Self::from_logging(&config.logging, config.logs_dir())
    }

    pub fn from_logging(logging: &LoggingConfig, logs_dir: PathBuf) -> Self {
        Self {
            level: logging.level.clone(),
            format: if logging.format == "json" { LogFormat::Json } else { LogFormat::Pretty },
            log_dir: logging.file.then_some(logs_dir),
            rotation: match logging.rotation.as_str() {
                "hourly" => RotationPolicy::Hourly,
                "never" => RotationPolicy::Never,
                _ => RotationPolicy::Daily,
            },
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}
