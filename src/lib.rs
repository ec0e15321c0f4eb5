//! fpmwatch - PHP-FPM exporter for pull-based monitoring
//!
//! On every pull the exporter queries each configured PHP-FPM socket over
//! FastCGI, reads the pool status page and, optionally, the output of PHP
//! scripts that print metrics in the Prometheus text format, and answers
//! with the merged metric families.
//!
//! ## Modules
//!
//! * `cli` - Command-line flags overriding the configuration file.
//!
//! * `config` - Configuration structures, loading, validation, and defaults.
//!   Supports TOML configuration files with validation via the `validator` crate.
//!
//! * `core` - Scrape pipeline:
//!   - FastCGI transport
//!   - Status page and script output parsers
//!   - Target registry, aggregation and the collection orchestrator
//!
//! * `logger` - Centralized logging initialization using `tracing`.
//!   Supports console output in multiple formats (compact, pretty, JSON)
//!   and optional systemd journald integration.
//!
//! * `web` - HTTP exposition server (`axum`).

pub mod cli;
pub mod config;
pub mod core;
pub mod logger;
pub mod web;
