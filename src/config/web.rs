//! HTTP exposition settings.

use std::net::{AddrParseError, SocketAddr};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Path answered by the liveness probe; the telemetry path may not shadow it.
pub const HEALTH_PATH: &str = "/healthz";

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// Address the exposition server binds to. A bare `:PORT` listens on
    /// all IPv4 interfaces.
    #[validate(custom(function = "validate_listen_address"))]
    pub listen_address: String,

    /// Path under which metrics are exposed.
    #[validate(custom(function = "validate_telemetry_path"))]
    pub telemetry_path: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9253".to_string(),
            telemetry_path: "/metrics".to_string(),
        }
    }
}

impl WebConfig {
    /// The listen address as a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        parse_listen_address(&self.listen_address)
    }
}

fn parse_listen_address(address: &str) -> Result<SocketAddr, AddrParseError> {
    match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}").parse(),
        None => address.parse(),
    }
}

fn validate_listen_address(address: &str) -> Result<(), ValidationError> {
    parse_listen_address(address).map(|_| ()).map_err(|e| {
        let mut err = ValidationError::new("invalid_listen_address");
        err.message = Some(format!("Invalid listen address {:?}: {}", address, e).into());
        err
    })
}

fn validate_telemetry_path(path: &str) -> Result<(), ValidationError> {
    if path.starts_with('/') && path != "/" && path != HEALTH_PATH {
        return Ok(());
    }
    let mut err = ValidationError::new("invalid_telemetry_path");
    err.message = Some(
        format!(
            "Telemetry path must start with '/' and differ from '/' and '{}': {:?}",
            HEALTH_PATH, path
        )
        .into(),
    );
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WebConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.telemetry_path, "/metrics");
    }

    #[test]
    fn test_listen_address() {
        for (address, ok) in [
            ("127.0.0.1:9253", true),
            ("[::]:9253", true),
            ("localhost:9253", false),
            (":9253", true),
            (":", false),
            (":port", false),
        ] {
            let config = WebConfig {
                listen_address: address.into(),
                ..Default::default()
            };
            assert_eq!(config.validate().is_ok(), ok, "{address}");
        }
    }

    #[test]
    fn test_bare_port_listens_on_all_interfaces() {
        let config = WebConfig {
            listen_address: ":9253".into(),
            ..Default::default()
        };
        assert_eq!(config.socket_addr().unwrap(), "0.0.0.0:9253".parse().unwrap());

        let config = WebConfig {
            listen_address: "[::1]:8080".into(),
            ..Default::default()
        };
        assert_eq!(config.socket_addr().unwrap(), "[::1]:8080".parse().unwrap());
    }

    #[test]
    fn test_telemetry_path() {
        for (path, ok) in [
            ("/metrics", true),
            ("/php/metrics", true),
            ("metrics", false),
            ("/", false),
            ("/healthz", false),
        ] {
            let config = WebConfig {
                telemetry_path: path.into(),
                ..Default::default()
            };
            assert_eq!(config.validate().is_ok(), ok, "{path}");
        }
    }
}
