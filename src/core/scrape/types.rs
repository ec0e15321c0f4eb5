use super::error::ScrapeError;
use crate::core::model::{MetricFamily, Observation};

/// Result type returned by every per-target scrape operation.
pub type ScrapeResult<T> = std::result::Result<T, ScrapeError>;

/// What a successful scrape of one target produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetOutput {
    /// Observations read from a status page.
    Status(Vec<Observation>),
    /// Families emitted by a metrics script, already relabeled.
    Script(Vec<MetricFamily>),
}
