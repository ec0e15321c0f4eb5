//! PHP-FPM scrape settings: which sockets to talk to and what to ask them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Socket used when nothing is configured.
pub const DEFAULT_SOCKET: &str = "/run/php/php-fpm.sock";

/// Path of the pool status page (`pm.status_path` in the pool config).
pub const DEFAULT_STATUS_PATH: &str = "/status";

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct PhpFpmConfig {
    /// Sockets to scrape: a unix socket path (optionally `unix://`-prefixed)
    /// or `tcp://host:port`. Order is preserved in the output.
    #[validate(
        length(min = 1, message = "At least one PHP-FPM socket must be configured"),
        custom(function = "validate_sockets")
    )]
    pub sockets: Vec<String>,

    /// Status page path. An empty string disables status scraping.
    #[validate(custom(function = "validate_status_path"))]
    pub status_path: String,

    /// Absolute paths of PHP scripts printing exposition text.
    #[validate(custom(function = "validate_script_paths"))]
    pub script_paths: Vec<String>,

    /// Upper bound for one request, connect included.
    #[validate(range(min = 1, max = 300, message = "Timeout must be between 1 and 300 seconds"))]
    pub timeout_seconds: u64,

    /// Maximum number of requests in flight during one collection; 0 means
    /// no limit.
    pub max_concurrent_scrapes: usize,
}

impl Default for PhpFpmConfig {
    fn default() -> Self {
        Self {
            sockets: vec![DEFAULT_SOCKET.to_string()],
            status_path: DEFAULT_STATUS_PATH.to_string(),
            script_paths: Vec::new(),
            timeout_seconds: 5,
            max_concurrent_scrapes: 0,
        }
    }
}

impl PhpFpmConfig {
    /// The status path, or `None` when status scraping is disabled.
    pub fn status_path(&self) -> Option<&str> {
        let path = self.status_path.trim();
        (!path.is_empty()).then_some(path)
    }

    /// Per-request budget covering connect, write and read.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn validation_error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn validate_sockets(sockets: &[String]) -> Result<(), ValidationError> {
    for socket in sockets {
        let trimmed = socket.trim();
        if trimmed.is_empty() || trimmed == "unix://" || trimmed == "tcp://" {
            return Err(validation_error(
                "invalid_socket",
                format!("Invalid PHP-FPM socket: {:?}", socket),
            ));
        }
    }
    Ok(())
}

fn validate_status_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() || path.starts_with('/') {
        return Ok(());
    }
    Err(validation_error(
        "invalid_status_path",
        format!("Status path must start with '/': {}", path),
    ))
}

fn validate_script_paths(paths: &[String]) -> Result<(), ValidationError> {
    match paths.iter().find(|p| !p.starts_with('/')) {
        Some(path) => Err(validation_error(
            "invalid_script_path",
            format!("Script path must be absolute: {:?}", path),
        )),
        None => Ok(()),
    }
}
