//! Per-target scraping: parsers, targets and result aggregation.

/// Result aggregation for one collection cycle.
pub mod aggregate;

/// Error types shared by the scrape pipeline.
pub mod error;

/// Prometheus text exposition parser for metrics scripts.
pub mod script;

/// PHP-FPM status page parser.
pub mod status;

/// Target definitions and the target registry.
pub mod targets;

/// Result aliases and scrape outputs.
pub mod types;
