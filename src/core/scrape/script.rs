//! Parser for metrics scripts executed through PHP-FPM.
//!
//! A metrics script prints Prometheus text exposition (format 0.0.4). The
//! output is parsed line by line into raw families, which are then folded
//! into `prometheus` protobuf [`MetricFamily`] values: summary and histogram
//! samples are grouped by their label set, everything else maps one line to
//! one metric. Every metric is finally tagged with the socket and script it
//! came from.

use std::collections::HashMap;

use prometheus::proto::{Bucket, Histogram, Quantile, Summary};

use super::error::ExpositionError;
use crate::core::model::{
    family, label_pair, sample, LabelPair, Metric, MetricExt, MetricFamily, MetricKind,
    SCRIPT_LABEL, SOCKET_LABEL,
};

/// Label holding the quantile of a summary sample.
const QUANTILE_LABEL: &str = "quantile";

/// Label holding the upper bound of a histogram bucket.
const BUCKET_LABEL: &str = "le";

/// Byte cursor over a single exposition line.
struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c == ' ' || c == '\t') {
            self.pos += 1;
        }
    }

    /// Consumes the longest prefix whose characters satisfy `first` (for the
    /// leading character) and `rest` (for the others).
    fn take_ident(&mut self, first: fn(char) -> bool, rest: fn(char) -> bool) -> &'a str {
        let start = self.pos;
        if self.peek().is_some_and(first) {
            self.pos += 1;
            while self.peek().is_some_and(rest) {
                self.pos += 1;
            }
        }
        &self.src[start..self.pos]
    }
}

fn is_metric_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_metric_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn is_label_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_metric_start) && chars.all(is_metric_char)
}

/// Parses a sample value, accepting the special spellings of the format.
fn parse_value(token: &str) -> Option<f64> {
    match token {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        _ => token.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

/// Undoes `\\` and `\n` escapes in HELP text.
fn unescape_help(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn parse_label_value(cursor: &mut Cursor<'_>, line: usize) -> Result<String, ExpositionError> {
    if cursor.bump() != Some('"') {
        return Err(ExpositionError::new(line, "label value must be quoted"));
    }
    let mut value = String::new();
    loop {
        match cursor.bump() {
            Some('"') => return Ok(value),
            Some('\\') => match cursor.bump() {
                Some('n') => value.push('\n'),
                Some('\\') => value.push('\\'),
                Some('"') => value.push('"'),
                Some(other) => {
                    return Err(ExpositionError::new(
                        line,
                        format!("invalid escape sequence \\{other} in label value"),
                    ))
                }
                None => return Err(ExpositionError::new(line, "unterminated label value")),
            },
            Some(c) => value.push(c),
            None => return Err(ExpositionError::new(line, "unterminated label value")),
        }
    }
}

fn parse_labels(cursor: &mut Cursor<'_>, line: usize) -> Result<Vec<LabelPair>, ExpositionError> {
    let mut labels = Vec::new();
    // opening brace already consumed
    loop {
        cursor.skip_whitespace();
        if cursor.peek() == Some('}') {
            cursor.bump();
            return Ok(labels);
        }

        let name = cursor.take_ident(is_label_start, is_label_char);
        if name.is_empty() {
            return Err(ExpositionError::new(line, "expected label name"));
        }
        cursor.skip_whitespace();
        if cursor.bump() != Some('=') {
            return Err(ExpositionError::new(
                line,
                format!("expected '=' after label name {name:?}"),
            ));
        }
        cursor.skip_whitespace();
        let value = parse_label_value(cursor, line)?;
        if labels.iter().any(|l: &LabelPair| l.get_name() == name) {
            return Err(ExpositionError::new(line, format!("duplicate label {name:?}")));
        }
        labels.push(label_pair(name, &value));

        cursor.skip_whitespace();
        match cursor.bump() {
            Some(',') => continue,
            Some('}') => return Ok(labels),
            _ => return Err(ExpositionError::new(line, "unterminated label set")),
        }
    }
}

/// One sample line, before it is folded into its family.
#[derive(Debug)]
struct RawSample {
    name: String,
    labels: Vec<LabelPair>,
    value: f64,
    timestamp_ms: Option<i64>,
    line: usize,
}

impl RawSample {
    /// Returns the labels other than `name`, and the value of `name`.
    fn split_label(&self, name: &str) -> (Vec<LabelPair>, Option<String>) {
        let mut rest = Vec::with_capacity(self.labels.len());
        let mut found = None;
        for label in &self.labels {
            if label.get_name() == name {
                found = Some(label.get_value().to_string());
            } else {
                rest.push(label.clone());
            }
        }
        (rest, found)
    }
}

fn parse_sample(text: &str, line: usize) -> Result<RawSample, ExpositionError> {
    let mut cursor = Cursor::new(text);

    let name = cursor.take_ident(is_metric_start, is_metric_char);
    if name.is_empty() {
        return Err(ExpositionError::new(line, "expected metric name"));
    }

    cursor.skip_whitespace();
    let labels = if cursor.peek() == Some('{') {
        cursor.bump();
        parse_labels(&mut cursor, line)?
    } else {
        Vec::new()
    };

    let mut tokens = cursor.rest().split_whitespace();
    let value_token = tokens
        .next()
        .ok_or_else(|| ExpositionError::new(line, format!("missing value for {name}")))?;
    let value = parse_value(value_token)
        .ok_or_else(|| ExpositionError::new(line, format!("invalid value {value_token:?}")))?;

    let timestamp_ms = match tokens.next() {
        Some(ts) => Some(
            ts.parse::<i64>()
                .map_err(|_| ExpositionError::new(line, format!("invalid timestamp {ts:?}")))?,
        ),
        None => None,
    };

    if let Some(extra) = tokens.next() {
        return Err(ExpositionError::new(
            line,
            format!("unexpected trailing token {extra:?}"),
        ));
    }

    Ok(RawSample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
        line,
    })
}

fn finish_metric(mut metric: Metric, labels: Vec<LabelPair>, timestamp_ms: Option<i64>) -> Metric {
    for label in labels {
        metric.mut_label().push(label);
    }
    if let Some(ts) = timestamp_ms {
        metric.set_timestamp_ms(ts);
    }
    metric
}

/// Summary or histogram samples sharing one label set.
#[derive(Default)]
struct SampleGroup {
    labels: Vec<LabelPair>,
    timestamp_ms: Option<i64>,
    /// `(quantile, value)` or `(upper bound, cumulative count)`.
    points: Vec<(f64, f64)>,
    sum: f64,
    count: Option<f64>,
}

impl SampleGroup {
    fn into_metric(self, kind: MetricKind) -> Metric {
        let count = self.count.unwrap_or(0.0) as u64;
        let mut metric = Metric::default();
        if kind == MetricKind::Summary {
            let mut summary = Summary::default();
            for (q, value) in self.points {
                let mut quantile = Quantile::default();
                quantile.set_quantile(q);
                quantile.set_value(value);
                summary.mut_quantile().push(quantile);
            }
            summary.set_sample_sum(self.sum);
            summary.set_sample_count(count);
            metric.set_summary(summary);
        } else {
            let mut histogram = Histogram::default();
            for (upper_bound, cumulative) in self.points {
                let mut bucket = Bucket::default();
                bucket.set_upper_bound(upper_bound);
                bucket.set_cumulative_count(cumulative as u64);
                histogram.mut_bucket().push(bucket);
            }
            histogram.set_sample_sum(self.sum);
            histogram.set_sample_count(count);
            metric.set_histogram(histogram);
        }
        finish_metric(metric, self.labels, self.timestamp_ms)
    }
}

/// Folds the samples of a summary or histogram family into one metric per
/// label set, in first-seen order.
///
/// The `+Inf` bucket is implied by the sample count and is not stored.
fn fold_grouped(
    family: &str,
    kind: MetricKind,
    samples: Vec<RawSample>,
) -> Result<Vec<Metric>, ExpositionError> {
    let point_label = if kind == MetricKind::Summary {
        QUANTILE_LABEL
    } else {
        BUCKET_LABEL
    };
    let mut groups: Vec<SampleGroup> = Vec::new();
    let mut index: HashMap<Vec<(String, String)>, usize> = HashMap::new();

    for raw in samples {
        let suffix = &raw.name[family.len()..];
        let (labels, point) = raw.split_label(point_label);
        let key: Vec<(String, String)> = labels
            .iter()
            .map(|l| (l.get_name().to_string(), l.get_value().to_string()))
            .collect();
        let idx = *index.entry(key).or_insert_with(|| {
            groups.push(SampleGroup {
                labels,
                ..Default::default()
            });
            groups.len() - 1
        });
        let group = &mut groups[idx];
        if group.timestamp_ms.is_none() {
            group.timestamp_ms = raw.timestamp_ms;
        }

        match (kind, suffix) {
            (MetricKind::Summary, "") | (MetricKind::Histogram, "_bucket") => {
                let point = point.ok_or_else(|| {
                    ExpositionError::new(
                        raw.line,
                        format!("{kind} sample {} has no {point_label:?} label", raw.name),
                    )
                })?;
                let bound = parse_value(&point).ok_or_else(|| {
                    ExpositionError::new(raw.line, format!("invalid {point_label} value {point:?}"))
                })?;
                if kind == MetricKind::Histogram && bound == f64::INFINITY {
                    group.count.get_or_insert(raw.value);
                    continue;
                }
                group.points.push((bound, raw.value));
            }
            (_, "_sum") => group.sum = raw.value,
            (_, "_count") => group.count = Some(raw.value),
            _ => {
                return Err(ExpositionError::new(
                    raw.line,
                    format!("{kind} sample {} needs a _bucket, _sum or _count suffix", raw.name),
                ))
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|group| group.into_metric(kind))
        .collect())
}

/// A family as declared in the text, with its samples in input order.
#[derive(Debug)]
struct RawFamily {
    name: String,
    help: Option<String>,
    kind: MetricKind,
    samples: Vec<RawSample>,
}

impl RawFamily {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            help: None,
            kind: MetricKind::Untyped,
            samples: Vec::new(),
        }
    }

    /// Whether a sample called `sample` belongs to this family, either by
    /// name or through one of the suffixes of its kind.
    fn owns_sample(&self, sample: &str) -> bool {
        match sample.strip_prefix(self.name.as_str()) {
            Some("") => true,
            Some(suffix) => self.kind.sample_suffixes().contains(&suffix),
            None => false,
        }
    }

    fn into_proto(self) -> Result<MetricFamily, ExpositionError> {
        let mut out = family(
            &self.name,
            self.help.as_deref().unwrap_or_default(),
            self.kind.metric_type(),
        );
        let metrics = match self.kind {
            MetricKind::Summary | MetricKind::Histogram => {
                fold_grouped(&self.name, self.kind, self.samples)?
            }
            kind => self
                .samples
                .into_iter()
                .map(|raw| {
                    finish_metric(sample(kind.metric_type(), raw.value), raw.labels, raw.timestamp_ms)
                })
                .collect(),
        };
        for metric in metrics {
            out.mut_metric().push(metric);
        }
        Ok(out)
    }
}

/// Accumulates families while keeping first-seen order.
#[derive(Default)]
struct FamilySet {
    families: Vec<RawFamily>,
    index: HashMap<String, usize>,
    current: Option<usize>,
}

impl FamilySet {
    fn get_or_create(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        self.families.push(RawFamily::new(name));
        let idx = self.families.len() - 1;
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Picks the family a sample belongs to, opening an untyped one when
    /// nothing declared so far claims it.
    fn family_for_sample(&mut self, sample: &str) -> usize {
        if let Some(idx) = self.current {
            if self.families[idx].owns_sample(sample) {
                return idx;
            }
        }
        if let Some(idx) = self
            .families
            .iter()
            .position(|family| family.owns_sample(sample))
        {
            return idx;
        }
        self.get_or_create(sample)
    }
}

fn parse_comment(body: &str, line: usize, set: &mut FamilySet) -> Result<(), ExpositionError> {
    let body = body.trim_start();
    let (keyword, rest) = match body.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim_start()),
        None => (body, ""),
    };
    if keyword != "HELP" && keyword != "TYPE" {
        return Ok(());
    }

    let (name, payload) = match rest.split_once(char::is_whitespace) {
        Some((name, payload)) => (name, payload.trim_start()),
        None => (rest, ""),
    };
    if !is_valid_metric_name(name) {
        return Err(ExpositionError::new(
            line,
            format!("invalid metric name {name:?} in {keyword} line"),
        ));
    }

    let idx = set.get_or_create(name);
    set.current = Some(idx);
    let family = &mut set.families[idx];

    if keyword == "HELP" {
        family.help = Some(unescape_help(payload));
        return Ok(());
    }

    let kind = MetricKind::from_type_keyword(payload.trim())
        .ok_or_else(|| ExpositionError::new(line, format!("unknown metric type {payload:?}")))?;
    if !family.samples.is_empty() {
        return Err(ExpositionError::new(
            line,
            format!("TYPE for {name} appears after its samples"),
        ));
    }
    family.kind = kind;
    Ok(())
}

/// Parses exposition text into metric families.
///
/// Any malformed line rejects the whole text. Untyped families are returned
/// as gauges.
pub fn parse_exposition(text: &str) -> Result<Vec<MetricFamily>, ExpositionError> {
    let mut set = FamilySet::default();

    for (idx, raw) in text.lines().enumerate() {
        let line_number = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            parse_comment(comment, line_number, &mut set)?;
            continue;
        }

        let sample = parse_sample(line, line_number)?;
        let family = set.family_for_sample(&sample.name);
        set.current = Some(family);
        set.families[family].samples.push(sample);
    }

    set.families.into_iter().map(RawFamily::into_proto).collect()
}

/// Builds relabeled copies of `families`, tagging every metric with the
/// socket and script that produced it.
pub fn relabel(families: &[MetricFamily], socket: &str, script: &str) -> Vec<MetricFamily> {
    families
        .iter()
        .map(|family| {
            let mut family = family.clone();
            for metric in family.mut_metric().iter_mut() {
                *metric = metric
                    .with_label(SOCKET_LABEL, socket)
                    .with_label(SCRIPT_LABEL, script);
            }
            family
        })
        .collect()
}
