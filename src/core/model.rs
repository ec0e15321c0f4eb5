// ============================================================================
// model.rs
// ============================================================================
//! Normalized metric model.
//!
//! Both scrape modes end up here: the status parser produces flat
//! [`Observation`]s, the script parser produces `prometheus` protobuf
//! [`MetricFamily`] values, and the aggregator folds everything into the
//! families handed to the `TextEncoder`.

use std::fmt;

use prometheus::proto::{Counter, Gauge};
pub use prometheus::proto::{LabelPair, Metric, MetricFamily, MetricType};

/// Prefix shared by every metric derived from the status page.
pub const NAMESPACE: &str = "php_fpm";

/// Label carrying the socket a sample was scraped from.
pub const SOCKET_LABEL: &str = "socket_path";

/// Label carrying the script whose output produced a sample.
pub const SCRIPT_LABEL: &str = "script_path";

/// Semantic type of a metric family as declared on a `# TYPE` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Summary,
    Histogram,
    Untyped,
}

impl MetricKind {
    /// Name used on `# TYPE` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Summary => "summary",
            MetricKind::Histogram => "histogram",
            MetricKind::Untyped => "untyped",
        }
    }

    /// Parses the kind keyword of a `# TYPE` line.
    pub fn from_type_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "summary" => Some(MetricKind::Summary),
            "histogram" => Some(MetricKind::Histogram),
            "untyped" => Some(MetricKind::Untyped),
            _ => None,
        }
    }

    /// Sample-name suffixes that still belong to a family of this kind.
    pub fn sample_suffixes(&self) -> &'static [&'static str] {
        match self {
            MetricKind::Summary => &["_sum", "_count"],
            MetricKind::Histogram => &["_bucket", "_sum", "_count"],
            _ => &[],
        }
    }

    /// Protobuf type of exported families of this kind.
    ///
    /// Untyped samples are exported as gauges.
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricKind::Counter => MetricType::COUNTER,
            MetricKind::Gauge | MetricKind::Untyped => MetricType::GAUGE,
            MetricKind::Summary => MetricType::SUMMARY,
            MetricKind::Histogram => MetricType::HISTOGRAM,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One numeric sample read from a status page during a single cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Metric name without the namespace, e.g. `idle_processes`.
    pub name: &'static str,
    pub value: f64,
    pub kind: MetricKind,
}

impl Observation {
    pub fn gauge(name: &'static str, value: f64) -> Self {
        Self {
            name,
            value,
            kind: MetricKind::Gauge,
        }
    }

    pub fn counter(name: &'static str, value: f64) -> Self {
        Self {
            name,
            value,
            kind: MetricKind::Counter,
        }
    }

    /// Fully-qualified family name, e.g. `php_fpm_idle_processes`.
    pub fn family_name(&self) -> String {
        format!("{}_{}", NAMESPACE, self.name)
    }

    /// The sample for this observation, labelled with its socket.
    pub fn to_metric(&self, socket: &str) -> Metric {
        sample(self.kind.metric_type(), self.value).with_label(SOCKET_LABEL, socket)
    }
}

pub fn label_pair(name: &str, value: &str) -> LabelPair {
    let mut pair = LabelPair::default();
    pair.set_name(name.to_string());
    pair.set_value(value.to_string());
    pair
}

/// An unlabelled counter or gauge sample; every other type is stored as a gauge.
pub fn sample(metric_type: MetricType, value: f64) -> Metric {
    let mut metric = Metric::default();
    if metric_type == MetricType::COUNTER {
        let mut counter = Counter::default();
        counter.set_value(value);
        metric.set_counter(counter);
    } else {
        let mut gauge = Gauge::default();
        gauge.set_value(value);
        metric.set_gauge(gauge);
    }
    metric
}

/// An empty family. An empty `help` leaves the help text unset.
pub fn family(name: &str, help: &str, metric_type: MetricType) -> MetricFamily {
    let mut family = MetricFamily::default();
    family.set_name(name.to_string());
    if !help.is_empty() {
        family.set_help(help.to_string());
    }
    family.set_field_type(metric_type);
    family
}

/// Label helpers on protobuf metrics.
pub trait MetricExt {
    /// Value of the label called `name`.
    fn label(&self, name: &str) -> Option<&str>;

    /// Returns a copy of this metric carrying `name=value`.
    ///
    /// An existing label with the same name keeps its position and gets the
    /// new value, so applying the same label twice is a no-op.
    fn with_label(&self, name: &str, value: &str) -> Metric;

    /// Counter value if the metric is a counter, gauge value otherwise.
    fn value(&self) -> f64;
}

impl MetricExt for Metric {
    fn label(&self, name: &str) -> Option<&str> {
        self.get_label()
            .iter()
            .find(|label| label.get_name() == name)
            .map(|label| label.get_value())
    }

    fn with_label(&self, name: &str, value: &str) -> Metric {
        let mut metric = self.clone();
        let position = metric
            .get_label()
            .iter()
            .position(|label| label.get_name() == name);
        match position {
            Some(idx) => metric.mut_label()[idx].set_value(value.to_string()),
            None => metric.mut_label().push(label_pair(name, value)),
        }
        metric
    }

    fn value(&self) -> f64 {
        if self.has_counter() {
            self.get_counter().get_value()
        } else {
            self.get_gauge().get_value()
        }
    }
}
