//! Application configuration loading, validation, and management.
//!
//! The top-level [`Config`] aggregates the logger, PHP-FPM and web sections.
//! It is read from a TOML file, validated, optionally overridden from the
//! command line, and stays immutable once the exporter is running.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{logger::LoggerConfig, phpfpm::PhpFpmConfig, web::WebConfig};

pub mod logger;
pub mod phpfpm;
pub mod web;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "FPMWATCH_CONFIG";

/// Configuration file used when neither the command line nor the
/// environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fpmwatch/config.toml";

/// Current UTC time for the `print_*` macros.
#[doc(hidden)]
pub fn console_timestamp() -> String {
    const FORMAT: &[time::format_description::FormatItem<'static>] = time::macros::format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
    );
    time::OffsetDateTime::now_utc()
        .format(FORMAT)
        .unwrap_or_default()
}

/// Simple macros for printing timestamped messages before the tracing subscriber
/// is initialized. These are used during early configuration loading.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::console_timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::console_timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::console_timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

/// Errors that can occur during configuration loading, parsing or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The named configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// Failure to parse the TOML configuration file.
    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    /// Validation failure after successful parsing.
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// Sockets and what to scrape from them.
    #[validate(nested)]
    pub phpfpm: PhpFpmConfig,

    /// Exposition server.
    #[validate(nested)]
    pub web: WebConfig,
}

impl Config {
    /// Locates and loads the configuration.
    ///
    /// Priority:
    /// 1. `explicit` (the `--config` flag)
    /// 2. `FPMWATCH_CONFIG` environment variable
    /// 3. `/etc/fpmwatch/config.toml`, if it exists
    /// 4. built-in defaults
    ///
    /// An explicitly named file that does not exist is an error; a missing
    /// fallback file is not.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::resolve_from(explicit, env.as_deref(), Path::new(DEFAULT_CONFIG_PATH))
    }

    fn resolve_from(
        explicit: Option<&Path>,
        env: Option<&Path>,
        fallback: &Path,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            print_info!("Using config from command line: {}", path.display());
            return Self::load(path);
        }
        if let Some(path) = env {
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Self::load(path);
        }
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Self::load(fallback);
        }

        print_info!("No configuration file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Loads and validates configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Propagates IO, parsing, and validation errors as `ConfigError`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let config_str = fs::read_to_string(path)?;
        let config = Self::from_toml(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Runs validation, e.g. again after command-line overrides.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const SAMPLE: &str = r#"
[logger]
level = "debug"

[phpfpm]
sockets = ["/run/php/www.sock", "tcp://127.0.0.1:9000"]
status_path = "/fpm-status"
script_paths = ["/srv/app/metrics.php"]
timeout_seconds = 3
max_concurrent_scrapes = 8

[web]
listen_address = "127.0.0.1:9300"
telemetry_path = "/php-metrics"
"#;

    fn write_config(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_file() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.logger.level, "debug");
        assert_eq!(
            config.phpfpm.sockets,
            vec!["/run/php/www.sock", "tcp://127.0.0.1:9000"]
        );
        assert_eq!(config.phpfpm.status_path(), Some("/fpm-status"));
        assert_eq!(config.phpfpm.script_paths, vec!["/srv/app/metrics.php"]);
        assert_eq!(config.phpfpm.timeout_seconds, 3);
        assert_eq!(config.phpfpm.max_concurrent_scrapes, 8);
        assert_eq!(config.web.listen_address, "127.0.0.1:9300");
        assert_eq!(config.web.telemetry_path, "/php-metrics");
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_error() {
        let err = Config::from_toml("[phpfpm\nsockets = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_error() {
        let err = Config::from_toml("[phpfpm]\nsockets = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = Config::from_toml("[web]\ntelemetry_path = \"metrics\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Config::resolve_from(Some(&missing), None, &dir.path().join("fallback.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_resolution_order() {
        let explicit = write_config("[web]\ntelemetry_path = \"/explicit\"\n");
        let env = write_config("[web]\ntelemetry_path = \"/env\"\n");
        let fallback = write_config("[web]\ntelemetry_path = \"/fallback\"\n");

        let config =
            Config::resolve_from(Some(explicit.path()), Some(env.path()), fallback.path()).unwrap();
        assert_eq!(config.web.telemetry_path, "/explicit");

        let config = Config::resolve_from(None, Some(env.path()), fallback.path()).unwrap();
        assert_eq!(config.web.telemetry_path, "/env");

        let config = Config::resolve_from(None, None, fallback.path()).unwrap();
        assert_eq!(config.web.telemetry_path, "/fallback");
    }

    #[test]
    fn test_missing_fallback_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve_from(None, None, &dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_console_timestamp_shape() {
        let stamp = console_timestamp();
        assert_eq!(stamp.len(), "2024-01-01T00:00:00.000000Z".len());
        assert!(stamp.ends_with('Z'));
    }
}
