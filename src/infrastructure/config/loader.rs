use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Agent id cannot be empty")]
    EmptyAgentId,

    #[error("Invalid agent id: {0}. Path separators and leading dots are not allowed")]
    InvalidAgentId(String),

    #[error("Invalid calls_per_hour: 0. Must be at least 1")]
    ZeroQuota,

    #[error("Invalid warn_threshold_pct: {0}. Must be between 1 and 100")]
    InvalidWarnThreshold(u32),

    #[error("Invalid max_attempts: 0. Must be at least 1")]
    ZeroAttempts,

    #[error("Invalid backoff configuration: base_delay_secs ({0}) must not exceed max_delay_secs ({1})")]
    InvalidBackoff(u64, u64),

    #[error("Invalid no_progress_threshold: {0}. Must be at least 2")]
    InvalidBreakerThreshold(u32),

    #[error("Invalid half_open_after: {0}. Must be between 1 and no_progress_threshold ({1})")]
    InvalidHalfOpen(u32, u32),

    #[error("Invalid output_decline_pct: {0}. Must be between 1 and 100")]
    InvalidDeclinePct(u32),

    #[error("Invalid quota signature '{pattern}': {reason}")]
    InvalidSignature { pattern: String, reason: String },

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Values supplied on the command line; unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autonomous: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<bool>,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. Global file: $XDG_CONFIG_HOME/taskforge/config.yaml
    /// 3. Project file: <project_dir>/.taskforge/config.yaml
    /// 4. Environment variables (TASKFORGE_* prefix, `__` for nesting)
    /// 5. Command-line overrides
    pub fn load(overrides: &ConfigOverrides) -> Result<Config> {
        let config: Config = Self::figment(overrides)
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// The merged provider stack, before extraction.
    pub fn figment(overrides: &ConfigOverrides) -> Figment {
        let project_dir = overrides.project_dir.clone().unwrap_or_else(|| PathBuf::from("."));

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(global) = Self::global_config_path() {
            figment = figment.merge(Yaml::file(global));
        }
        figment
            .merge(Yaml::file(Self::project_config_path(&project_dir)))
            .merge(Env::prefixed("TASKFORGE_").split("__"))
            .merge(Serialized::defaults(overrides))
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
        Some(base.join("taskforge").join("config.yaml"))
    }

    pub fn project_config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".taskforge").join("config.yaml")
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        // Agent id names a directory under the state root
        if config.agent_id.trim().is_empty() {
            return Err(ConfigError::EmptyAgentId);
        }
        if config.agent_id.contains(['/', '\\']) || config.agent_id.starts_with('.') {
            return Err(ConfigError::InvalidAgentId(config.agent_id.clone()));
        }

        if config.phases.is_empty() || config.phases.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "phases must list at least one non-empty phase name".to_string(),
            ));
        }

        // Validate rate_limit
        if config.rate_limit.calls_per_hour == 0 {
            return Err(ConfigError::ZeroQuota);
        }
        if !(1..=100).contains(&config.rate_limit.warn_threshold_pct) {
            return Err(ConfigError::InvalidWarnThreshold(config.rate_limit.warn_threshold_pct));
        }

        // Validate retry config
        if config.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if config.retry.base_delay_secs > config.retry.max_delay_secs {
            return Err(ConfigError::InvalidBackoff(
                config.retry.base_delay_secs,
                config.retry.max_delay_secs,
            ));
        }

        // Validate circuit breaker
        let cb = &config.circuit_breaker;
        if cb.no_progress_threshold < 2 {
            return Err(ConfigError::InvalidBreakerThreshold(cb.no_progress_threshold));
        }
        if cb.half_open_after == 0 || cb.half_open_after > cb.no_progress_threshold {
            return Err(ConfigError::InvalidHalfOpen(cb.half_open_after, cb.no_progress_threshold));
        }
        if !(1..=100).contains(&cb.output_decline_pct) {
            return Err(ConfigError::InvalidDeclinePct(cb.output_decline_pct));
        }
        if cb.same_error_threshold == 0 || cb.failure_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "same_error_threshold and failure_threshold must be at least 1".to_string(),
            ));
        }

        // Validate agent config
        if config.agent.command.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("agent command cannot be empty".to_string()));
        }
        for pattern in &config.agent.quota_signatures {
            if let Err(e) = Regex::new(pattern) {
                return Err(ConfigError::InvalidSignature {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                });
            }
        }

        // Validate logging config
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Run `f` with the global config pointed at an empty directory.
    fn isolated<R>(vars: &[(&str, Option<&str>)], xdg: &Path, f: impl FnOnce() -> R) -> R {
        let mut all: Vec<(String, Option<String>)> = vec![(
            "XDG_CONFIG_HOME".to_string(),
            Some(xdg.display().to_string()),
        )];
        all.extend(vars.iter().map(|(k, v)| ((*k).to_string(), v.map(str::to_string))));
        temp_env::with_vars(all, f)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.rate_limit.calls_per_hour, 80);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.circuit_breaker.cooldown_secs, 600);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
agent_id: worker-2
phases: [implement]
rate_limit:
  calls_per_hour: 40
  warn_threshold_pct: 90
circuit_breaker:
  no_progress_threshold: 4
  cooldown_secs: 120
agent:
  command: my-agent
  fallback_models:
    big: small
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.agent_id, "worker-2");
        assert_eq!(config.phases, vec!["implement"]);
        assert_eq!(config.rate_limit.calls_per_hour, 40);
        assert_eq!(config.circuit_breaker.no_progress_threshold, 4);
        assert_eq!(config.circuit_breaker.half_open_after, 2);
        assert_eq!(config.agent.command, "my-agent");
        assert_eq!(config.agent.fallback_models.get("big").map(String::as_str), Some("small"));
        assert_eq!(config.retry.base_delay_secs, 5);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases: Vec<(fn(&mut Config), fn(&ConfigError) -> bool)> = vec![
            (|c| c.agent_id = String::new(), |e| matches!(e, ConfigError::EmptyAgentId)),
            (|c| c.agent_id = "../x".to_string(), |e| matches!(e, ConfigError::InvalidAgentId(_))),
            (|c| c.rate_limit.calls_per_hour = 0, |e| matches!(e, ConfigError::ZeroQuota)),
            (|c| c.rate_limit.warn_threshold_pct = 0, |e| matches!(e, ConfigError::InvalidWarnThreshold(0))),
            (|c| c.rate_limit.warn_threshold_pct = 101, |e| matches!(e, ConfigError::InvalidWarnThreshold(101))),
            (|c| c.retry.max_attempts = 0, |e| matches!(e, ConfigError::ZeroAttempts)),
            (
                |c| {
                    c.retry.base_delay_secs = 90;
                    c.retry.max_delay_secs = 60;
                },
                |e| matches!(e, ConfigError::InvalidBackoff(90, 60)),
            ),
            (|c| c.circuit_breaker.no_progress_threshold = 1, |e| matches!(e, ConfigError::InvalidBreakerThreshold(1))),
            (|c| c.circuit_breaker.half_open_after = 5, |e| matches!(e, ConfigError::InvalidHalfOpen(5, 3))),
            (|c| c.agent.quota_signatures = vec!["(".to_string()], |e| matches!(e, ConfigError::InvalidSignature { .. })),
            (|c| c.logging.level = "loud".to_string(), |e| matches!(e, ConfigError::InvalidLogLevel(_))),
            (|c| c.logging.format = "xml".to_string(), |e| matches!(e, ConfigError::InvalidLogFormat(_))),
            (|c| c.logging.rotation = "weekly".to_string(), |e| matches!(e, ConfigError::InvalidRotation(_))),
            (|c| c.phases.clear(), |e| matches!(e, ConfigError::ValidationFailed(_))),
        ];

        for (i, (mutate, expected)) in cases.into_iter().enumerate() {
            let mut config = Config::default();
            mutate(&mut config);
            let err = ConfigLoader::validate(&config).expect_err("config should be rejected");
            assert!(expected(&err), "case {i}: unexpected error {err:?}");
        }
    }

    #[test]
    fn test_layers_merge_in_precedence_order() {
        let xdg = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        fs::create_dir_all(xdg.path().join("taskforge")).unwrap();
        fs::write(
            xdg.path().join("taskforge/config.yaml"),
            "agent_id: from-global\nretry:\n  max_attempts: 7\nrate_limit:\n  calls_per_hour: 10\n",
        )
        .unwrap();
        fs::create_dir_all(project.path().join(".taskforge")).unwrap();
        fs::write(
            project.path().join(".taskforge/config.yaml"),
            "agent_id: from-project\nrate_limit:\n  calls_per_hour: 20\n",
        )
        .unwrap();

        let overrides = ConfigOverrides {
            project_dir: Some(project.path().to_path_buf()),
            autonomous: Some(true),
            ..ConfigOverrides::default()
        };

        let config = isolated(&[("TASKFORGE_RATE_LIMIT__CALLS_PER_HOUR", Some("30"))], xdg.path(), || {
            ConfigLoader::load(&overrides).unwrap()
        });

        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.agent_id, "from-project");
        assert_eq!(config.rate_limit.calls_per_hour, 30);
        assert!(config.autonomous);
        assert_eq!(config.project_dir, project.path());
    }

    #[test]
    fn test_cli_override_beats_env() {
        let xdg = TempDir::new().unwrap();
        let overrides = ConfigOverrides {
            project_dir: Some(xdg.path().to_path_buf()),
            agent_id: Some("cli-agent".to_string()),
            resume: Some(false),
            ..ConfigOverrides::default()
        };

        let config = isolated(
            &[("TASKFORGE_AGENT_ID", Some("env-agent")), ("TASKFORGE_LOGGING__LEVEL", Some("debug"))],
            xdg.path(),
            || ConfigLoader::load(&overrides).unwrap(),
        );

        assert_eq!(config.agent_id, "cli-agent");
        assert_eq!(config.logging.level, "debug");
        assert!(!config.resume);
    }

    #[test]
    fn test_invalid_env_value_fails_validation() {
        let xdg = TempDir::new().unwrap();
        let overrides = ConfigOverrides {
            project_dir: Some(xdg.path().to_path_buf()),
            ..ConfigOverrides::default()
        };
        let result = isolated(&[("TASKFORGE_RETRY__MAX_ATTEMPTS", Some("0"))], xdg.path(), || {
            ConfigLoader::load(&overrides)
        });
        let err = result.unwrap_err();
        assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::ZeroAttempts)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.yaml");
        fs::write(&path, "lock:\n  timeout_secs: 60\n").unwrap();
        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.lock.timeout_secs, 60);
        assert_eq!(config.lock.heartbeat_interval_secs, 60);
    }
}
