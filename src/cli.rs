//! Command-line interface.
//!
//! Every flag is optional and, when given, overrides the matching value
//! from the configuration file (CLI > ENV > config file > defaults).

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

/// PHP-FPM exporter for pull-based monitoring
#[derive(Parser, Debug, Default)]
#[command(name = "fpmwatch", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "FPMWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address on which to expose metrics and web interface (`:PORT` for all interfaces)
    #[arg(long = "web.listen-address", value_name = "ADDR")]
    pub listen_address: Option<String>,

    /// Path under which to expose metrics
    #[arg(long = "web.telemetry-path", value_name = "PATH")]
    pub telemetry_path: Option<String>,

    /// Comma-separated PHP-FPM sockets (unix paths or tcp://host:port)
    #[arg(long = "phpfpm.socket-paths", value_name = "SOCKETS", value_delimiter = ',')]
    pub socket_paths: Option<Vec<String>>,

    /// Path of the pool status page; an empty value disables status scraping
    #[arg(long = "phpfpm.status-path", alias = "phpfpm.scriptname", value_name = "PATH")]
    pub status_path: Option<String>,

    /// Comma-separated PHP scripts printing exposition text
    #[arg(long = "phpfpm.script-paths", value_name = "SCRIPTS", value_delimiter = ',')]
    pub script_paths: Option<Vec<String>>,

    /// Log level (overrides config file)
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Applies the overrides given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(address) = &self.listen_address {
            config.web.listen_address = address.clone();
        }
        if let Some(path) = &self.telemetry_path {
            config.web.telemetry_path = path.clone();
        }
        if let Some(sockets) = &self.socket_paths {
            config.phpfpm.sockets = non_empty(sockets);
        }
        if let Some(path) = &self.status_path {
            config.phpfpm.status_path = path.clone();
        }
        if let Some(scripts) = &self.script_paths {
            config.phpfpm.script_paths = non_empty(scripts);
        }
        if let Some(level) = &self.log_level {
            config.logger.level = level.clone();
        }
    }
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
