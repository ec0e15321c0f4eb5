use thiserror::Error;

use crate::core::transport::TransportError;

/// Reasons a status page is rejected as a whole.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatusParseError {
    /// A line did not have the `label: value` shape.
    #[error("Failed to parse status line {line_number}: {line:?}")]
    MalformedLine { line_number: usize, line: String },

    /// A known gauge or counter carried a non-numeric value.
    #[error("Failed to parse {label:?} value {value:?} as a number")]
    InvalidNumber { label: String, value: String },

    /// The `start time` line was not in `DD/Mon/YYYY:HH:MM:SS ±HHMM` form.
    #[error("Failed to parse start time {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

/// Malformed exposition text returned by a metrics script.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid exposition text at line {line}: {reason}")]
pub struct ExpositionError {
    pub line: usize,
    pub reason: String,
}

impl ExpositionError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Everything that can go wrong while scraping one target.
///
/// These never escape a collection cycle; the aggregator turns each one
/// into a log record and a degraded result for the target it came from.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// The socket could not be reached or did not answer in time.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The status page was received but could not be understood.
    #[error("Malformed status page: {0}")]
    Status(#[from] StatusParseError),

    /// The script output was received but was not valid exposition text.
    #[error("Malformed script output: {0}")]
    Exposition(#[from] ExpositionError),

    /// The response body was not UTF-8.
    #[error("Response body is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// The scrape task itself panicked or was cancelled.
    #[error("Scrape task failed: {0}")]
    Task(String),
}

impl ScrapeError {
    /// Short machine-friendly category, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Transport(_) => "transport",
            ScrapeError::Status(_) => "status_content",
            ScrapeError::Exposition(_) => "script_content",
            ScrapeError::Encoding(_) => "encoding",
            ScrapeError::Task(_) => "task",
        }
    }
}
