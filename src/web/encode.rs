//! Text exposition of collected families (format 0.0.4).

use prometheus::{Encoder, TextEncoder};
use thiserror::Error;

use crate::core::model::MetricFamily;

/// Content type of [`encode`] output.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Failed to encode metrics: {0}")]
    Encoder(#[from] prometheus::Error),

    #[error("Metrics contain invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Renders `families` in order. Empty families are skipped.
pub fn encode(mut families: Vec<MetricFamily>) -> Result<String, EncodeError> {
    families.retain(|family| !family.get_metric().is_empty());

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
