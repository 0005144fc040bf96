//! Environment-driven application configuration.

use std::num::NonZeroUsize;

use parley_events::SessionConfig;
use parley_telemetry::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha};

use crate::error::{AppError, AppResult};

/// Log level override (`trace` .. `error`); `RUST_LOG` still wins when set.
pub const LOG_LEVEL_ENV: &str = "PARLEY_LOG_LEVEL";
/// Log output format: `json` or `pretty`.
pub const LOG_FORMAT_ENV: &str = "PARLEY_LOG_FORMAT";
/// Per-session buffer bound; unset means unbounded.
pub const SESSION_CAPACITY_ENV: &str = "PARLEY_SESSION_CAPACITY";
/// Whether to seed demo users and channels at startup.
pub const SEED_DEMO_ENV: &str = "PARLEY_SEED_DEMO";

/// Settings resolved at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Log level passed to the tracing filter.
    pub log_level: String,
    /// Output format for the tracing subscriber.
    pub log_format: LogFormat,
    /// Maximum buffered events per subscription session.
    pub session_capacity: Option<NonZeroUsize>,
    /// Seed demo records into the store.
    pub seed_demo: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::infer(),
            session_capacity: None,
            seed_demo: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidConfig`] when a variable holds an unusable value.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps variable names to values.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidConfig`] when a variable holds an unusable value.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let log_level = lookup(LOG_LEVEL_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.log_level);
        let log_format = match lookup(LOG_FORMAT_ENV) {
            Some(value) => value.parse::<LogFormat>().map_err(|_| AppError::InvalidConfig {
                field: "log_format",
                reason: "unknown_format",
                value: Some(value),
            })?,
            None => defaults.log_format,
        };
        let session_capacity = match lookup(SESSION_CAPACITY_ENV) {
            Some(value) => Some(parse_capacity(&value)?),
            None => defaults.session_capacity,
        };
        let seed_demo = match lookup(SEED_DEMO_ENV) {
            Some(value) => parse_flag(&value).ok_or(AppError::InvalidConfig {
                field: "seed_demo",
                reason: "not_a_flag",
                value: Some(value),
            })?,
            None => defaults.seed_demo,
        };

        Ok(Self {
            log_level,
            log_format,
            session_capacity,
            seed_demo,
        })
    }

    /// Logging settings for [`parley_telemetry::init_logging`].
    #[must_use]
    pub fn logging(&self) -> LoggingConfig<'_> {
        LoggingConfig {
            level: &self.log_level,
            format: self.log_format,
            build_sha: build_sha(),
        }
    }

    /// Buffering policy applied to every subscription session.
    #[must_use]
    pub const fn session_config(&self) -> SessionConfig {
        SessionConfig {
            capacity: self.session_capacity,
        }
    }
}

fn parse_capacity(value: &str) -> AppResult<NonZeroUsize> {
    value
        .trim()
        .parse::<NonZeroUsize>()
        .map_err(|_| AppError::InvalidConfig {
            field: "session_capacity",
            reason: "not_a_positive_integer",
            value: Some(value.to_string()),
        })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> AppResult<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = load(&[]).expect("defaults");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.session_config(), SessionConfig::unbounded());
        assert!(config.seed_demo);
    }

    #[test]
    fn variables_override_defaults() {
        let config = load(&[
            (LOG_LEVEL_ENV, "debug"),
            (LOG_FORMAT_ENV, "json"),
            (SESSION_CAPACITY_ENV, " 64 "),
            (SEED_DEMO_ENV, "off"),
        ])
        .expect("config");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.session_capacity, NonZeroUsize::new(64));
        assert!(!config.seed_demo);

        let logging = config.logging();
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, LogFormat::Json);
    }

    #[test]
    fn blank_log_level_falls_back_to_default() {
        let config = load(&[(LOG_LEVEL_ENV, "  ")]).expect("config");
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn invalid_values_are_reported_with_field() {
        for (name, value, field) in [
            (LOG_FORMAT_ENV, "xml", "log_format"),
            (SESSION_CAPACITY_ENV, "0", "session_capacity"),
            (SESSION_CAPACITY_ENV, "lots", "session_capacity"),
            (SEED_DEMO_ENV, "maybe", "seed_demo"),
        ] {
            match load(&[(name, value)]) {
                Err(AppError::InvalidConfig {
                    field: reported,
                    value: Some(reported_value),
                    ..
                }) => {
                    assert_eq!(reported, field);
                    assert_eq!(reported_value, value);
                }
                other => panic!("expected invalid config for {name}={value}, got {other:?}"),
            }
        }
    }
}
