// Configuration loading for the Courier dispatch engine

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat, merge_values, normalize_keys};
pub use validation::{ConfigValidator, Validate};

use courier_core::{DispatchOptions, ResilienceOptions};
use courier_log::LogConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Everything a host needs to build a dispatcher and install logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Dispatcher options
    pub dispatch: DispatchOptions,
    /// Retry, circuit breaker and timeout options
    pub resilience: ResilienceOptions,
    /// Logging setup
    pub log: LogConfig,
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        self.dispatch.validate()?;
        self.resilience.validate()
    }
}

/// Layered settings loader.
///
/// Sources apply in order, later ones winning field by field:
/// defaults, the configuration file, the dotenv file, then prefixed
/// environment variables (`COURIER_DISPATCH__DEFAULT_TIMEOUT_SECONDS=5`).
pub struct SettingsLoader {
    file: Option<(PathBuf, Option<FileFormat>)>,
    dotenv: Option<PathBuf>,
    env: Option<EnvLoader>,
}

impl SettingsLoader {
    /// Loader reading only `COURIER_*` environment variables.
    pub fn new() -> Self {
        Self {
            file: None,
            dotenv: None,
            env: Some(EnvLoader::default()),
        }
    }

    /// Read a configuration file, format detected from its extension.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some((path.into(), None));
        self
    }

    /// Read a configuration file in an explicit format.
    pub fn file_with_format(mut self, path: impl Into<PathBuf>, format: FileFormat) -> Self {
        self.file = Some((path.into(), Some(format)));
        self
    }

    /// Load a dotenv file into the process environment before reading it.
    /// Variables already set are not overridden.
    pub fn dotenv(mut self, path: impl Into<PathBuf>) -> Self {
        self.dotenv = Some(path.into());
        self
    }

    /// Use a different environment variable prefix.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env = Some(EnvLoader::new(Some(prefix.into())));
        self
    }

    /// Ignore environment variables.
    pub fn without_env(mut self) -> Self {
        self.env = None;
        self
    }

    /// Load and validate settings against the process environment.
    pub fn load(&self) -> Result<Settings> {
        if let Some(path) = &self.dotenv {
            dotenvy::from_path(path).map_err(|e| {
                ConfigError::LoadError(format!("Failed to load {}: {}", path.display(), e))
            })?;
        }
        self.load_with_vars(std::env::vars())
    }

    /// Load and validate settings against an explicit variable set.
    ///
    /// The dotenv file is not read here.
    pub fn load_with_vars<I>(&self, vars: I) -> Result<Settings>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut merged = Value::Object(Default::default());

        if let Some((path, format)) = &self.file {
            merge_values(&mut merged, read_file(path, *format)?);
            debug!(path = %path.display(), "Loaded configuration file");
        }

        if let Some(env) = &self.env {
            merge_values(&mut merged, env.nested_from(vars));
        }

        let settings: Settings = serde_json::from_value(merged)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
        settings.validate()?;

        Ok(settings)
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_file(path: &Path, format: Option<FileFormat>) -> Result<Value> {
    let loader = match format {
        Some(format) => ConfigLoader::new(format),
        None => ConfigLoader::auto(path)?,
    };
    loader.load_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_log::{Format, Level};

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_sources() {
        let settings = SettingsLoader::new().load_with_vars(Vec::new()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.dispatch.default_timeout_seconds, 60);
    }

    #[test]
    fn test_environment_overrides() {
        let settings = SettingsLoader::new()
            .load_with_vars(vars(&[
                ("COURIER_DISPATCH__DEFAULT_TIMEOUT_SECONDS", "5"),
                ("COURIER_RESILIENCE__CIRCUIT_BREAKER__FAILURE_THRESHOLD", "3"),
                ("COURIER_LOG__LEVEL", "warn"),
                ("COURIER_LOG__FORMAT", "pretty"),
                // Read by courier-log directly, ignored here
                ("COURIER_DEBUG", "1"),
            ]))
            .unwrap();

        assert_eq!(settings.dispatch.default_timeout_seconds, 5);
        assert_eq!(settings.resilience.circuit_breaker.failure_threshold, 3);
        assert_eq!(settings.log.level, Level::Warn);
        assert_eq!(settings.log.format, Format::Pretty);
        assert!(!settings.log.debug);
    }

    #[test]
    fn test_custom_prefix_and_without_env() {
        let env = vars(&[("APP_DISPATCH__TRACK_REQUEST_METRICS", "false")]);

        let settings = SettingsLoader::new()
            .env_prefix("APP")
            .load_with_vars(env.clone())
            .unwrap();
        assert!(!settings.dispatch.track_request_metrics);

        let settings = SettingsLoader::new().without_env().load_with_vars(env).unwrap();
        assert!(settings.dispatch.track_request_metrics);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SettingsLoader::new()
            .load_with_vars(vars(&[("COURIER_RESILIENCE__RETRY__BACKOFF_FACTOR", "0.5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = SettingsLoader::new()
            .load_with_vars(vars(&[("COURIER_DISPATCH__DEFAULT_TIMEOUT_SECONDS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DeserializationError(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = SettingsLoader::new()
            .file("/nonexistent/courier.toml")
            .load_with_vars(Vec::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }
}
