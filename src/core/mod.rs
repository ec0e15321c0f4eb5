//! Scrape-and-normalize core.

pub mod exporter;
pub mod model;
pub mod scrape;
pub mod transport;
