//! PHP-FPM status page parser.
//!
//! The status page is a plain list of `label: value` lines, e.g.
//!
//! ```text
//! pool:                 www
//! start time:           04/Jan/2019:17:59:31 +0000
//! accepted conn:        51602
//! idle processes:       0
//! ```
//!
//! Labels listed in [`STATUS_FIELDS`] become observations; every other
//! well-formed line is ignored so that fields added by newer PHP-FPM
//! releases do not break scraping.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

use super::error::StatusParseError;
use crate::core::model::{MetricKind, Observation};

/// Layout of the `start time` field, e.g. `04/Jan/2019:17:59:31 +0000`.
///
/// Every component has a fixed width and the month name is case-sensitive.
const START_TIME_FORMAT: &[FormatItem<'static>] = format_description!(
    "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
);

/// How the value text of a status field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    /// Plain decimal number.
    Number,
    /// `DD/Mon/YYYY:HH:MM:SS ±HHMM`, converted to Unix seconds.
    Timestamp,
}

/// Describes one status page label we export.
#[derive(Debug, Clone, Copy)]
pub struct StatusField {
    /// Label as printed by PHP-FPM.
    pub label: &'static str,
    /// Metric name without namespace.
    pub name: &'static str,
    pub kind: MetricKind,
    pub format: ValueFormat,
    pub help: &'static str,
}

/// Every exported status field, in exposition order.
pub const STATUS_FIELDS: &[StatusField] = &[
    StatusField {
        label: "accepted conn",
        name: "accepted_connections_total",
        kind: MetricKind::Counter,
        format: ValueFormat::Number,
        help: "Number of request accepted by the pool.",
    },
    StatusField {
        label: "start time",
        name: "start_time_seconds",
        kind: MetricKind::Gauge,
        format: ValueFormat::Timestamp,
        help: "Unix time when FPM has started or reloaded.",
    },
    StatusField {
        label: "listen queue",
        name: "listen_queue",
        kind: MetricKind::Gauge,
        format: ValueFormat::Number,
        help: "Number of request in the queue of pending connections.",
    },
    StatusField {
        label: "max listen queue",
        name: "max_listen_queue",
        kind: MetricKind::Gauge,
        format: ValueFormat::Number,
        help: "Maximum number of requests in the queue of pending connections since FPM has started.",
    },
    StatusField {
        label: "listen queue len",
        name: "listen_queue_length",
        kind: MetricKind::Gauge,
        format: ValueFormat::Number,
        help: "The size of the socket queue of pending connections.",
    },
    StatusField {
        label: "idle processes",
        name: "idle_processes",
        kind: MetricKind::Gauge,
        format: ValueFormat::Number,
        help: "Number of idle processes.",
    },
    StatusField {
        label: "active processes",
        name: "active_processes",
        kind: MetricKind::Gauge,
        format: ValueFormat::Number,
        help: "Number of active processes.",
    },
    StatusField {
        label: "max active processes",
        name: "max_active_processes",
        kind: MetricKind::Gauge,
        format: ValueFormat::Number,
        help: "Maximum number of active processes since FPM has started.",
    },
    StatusField {
        label: "max children reached",
        name: "max_children_reached",
        kind: MetricKind::Gauge,
        format: ValueFormat::Number,
        help: "Number of times, the process limit has been reached.",
    },
    StatusField {
        label: "slow requests",
        name: "slow_requests",
        kind: MetricKind::Gauge,
        format: ValueFormat::Number,
        help: "Enable php-fpm slow-log before you consider this. If this value is non-zero you may have slow php processes.",
    },
];

/// Label → field index, built on first use and never modified.
static FIELDS_BY_LABEL: Lazy<HashMap<&'static str, &'static StatusField>> =
    Lazy::new(|| STATUS_FIELDS.iter().map(|f| (f.label, f)).collect());

/// Looks up the descriptor for a status label.
pub fn field_for_label(label: &str) -> Option<&'static StatusField> {
    FIELDS_BY_LABEL.get(label).copied()
}

/// Splits a line into `(label, value)`.
///
/// The label runs up to the last colon that is followed by at least one
/// space; the value is the remainder with surrounding whitespace removed.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let sep = line.rfind(": ")?;
    let label = &line[..sep];
    let value = line[sep + 1..].trim();
    Some((label, value))
}

fn parse_number(label: &str, value: &str) -> Result<f64, StatusParseError> {
    value
        .parse::<f64>()
        .map_err(|_| StatusParseError::InvalidNumber {
            label: label.to_string(),
            value: value.to_string(),
        })
}

fn parse_start_time(value: &str) -> Result<f64, StatusParseError> {
    let started = OffsetDateTime::parse(value, START_TIME_FORMAT).map_err(|e| {
        StatusParseError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(started.unix_timestamp() as f64)
}

/// Parses a whole status page.
///
/// Either every line is understood and all observations are returned, or
/// the first offending line aborts the parse and nothing is returned.
pub fn parse_status(text: &str) -> Result<Vec<Observation>, StatusParseError> {
    let mut observations = Vec::with_capacity(STATUS_FIELDS.len());

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let (label, value) = split_line(line).ok_or_else(|| StatusParseError::MalformedLine {
            line_number: idx + 1,
            line: line.to_string(),
        })?;

        let Some(field) = field_for_label(label) else {
            continue;
        };

        let parsed = match field.format {
            ValueFormat::Number => parse_number(label, value)?,
            ValueFormat::Timestamp => parse_start_time(value)?,
        };

        observations.push(Observation {
            name: field.name,
            value: parsed,
            kind: field.kind,
        });
    }

    Ok(observations)
}
