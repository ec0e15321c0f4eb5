// ============================================================================
// aggregate.rs
// ============================================================================
//! Folds per-target scrape results into one set of metric families.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::{
    status::STATUS_FIELDS,
    targets::Target,
    types::{ScrapeResult, TargetOutput},
};
use crate::core::model::{
    family, sample, MetricExt, MetricFamily, MetricType, Observation, NAMESPACE, SOCKET_LABEL,
};

const UP_HELP: &str = "Whether scraping PHP-FPM's metrics was successful.";

/// Collects the results of one cycle.
///
/// Families are kept in first-seen order: `php_fpm_up`, then the status
/// families in table order, then script families as they arrive. The first
/// two groups are reserved: only status targets may add samples to them.
pub struct Aggregator {
    families: Vec<MetricFamily>,
    index: HashMap<String, usize>,
    /// Families below this index belong to status scraping.
    reserved: usize,
    succeeded: usize,
    failed: usize,
}

impl Aggregator {
    /// Creates an aggregator pre-seeded with the `up` and status families.
    pub fn new() -> Self {
        let mut aggregator = Self {
            families: Vec::with_capacity(STATUS_FIELDS.len() + 1),
            index: HashMap::new(),
            reserved: 0,
            succeeded: 0,
            failed: 0,
        };
        aggregator.insert(family(&up_family_name(), UP_HELP, MetricType::GAUGE));
        for field in STATUS_FIELDS {
            aggregator.insert(family(
                &format!("{}_{}", NAMESPACE, field.name),
                field.help,
                field.kind.metric_type(),
            ));
        }
        aggregator.reserved = aggregator.families.len();
        aggregator
    }

    fn insert(&mut self, family: MetricFamily) -> usize {
        let idx = self.families.len();
        self.index.insert(family.get_name().to_string(), idx);
        self.families.push(family);
        idx
    }

    fn push_up(&mut self, socket: &str, reachable: bool) {
        let value = if reachable { 1.0 } else { 0.0 };
        let metric = sample(MetricType::GAUGE, value).with_label(SOCKET_LABEL, socket);
        self.families[0].mut_metric().push(metric);
    }

    fn push_observation(&mut self, socket: &str, observation: &Observation) {
        let name = observation.family_name();
        let idx = match self.index.get(&name) {
            Some(&idx) => idx,
            None => self.insert(family(&name, "", observation.kind.metric_type())),
        };
        self.families[idx]
            .mut_metric()
            .push(observation.to_metric(socket));
    }

    fn merge_family(&mut self, target: &Target, mut family: MetricFamily) {
        let Some(&idx) = self.index.get(family.get_name()) else {
            self.insert(family);
            return;
        };

        if idx < self.reserved {
            warn!(
                socket = %target.socket,
                script = target.path(),
                family = family.get_name(),
                "Dropping family: name is reserved for status metrics"
            );
            return;
        }

        let existing = &mut self.families[idx];
        if existing.get_field_type() != family.get_field_type() {
            warn!(
                socket = %target.socket,
                script = target.path(),
                family = family.get_name(),
                "Dropping family: declared as {:?} but already collected as {:?}",
                family.get_field_type(),
                existing.get_field_type()
            );
            return;
        }
        if !existing.has_help() && family.has_help() {
            existing.set_help(family.take_help());
        }
        for metric in family.take_metric().into_vec() {
            existing.mut_metric().push(metric);
        }
    }

    /// Records the outcome of scraping `target`.
    ///
    /// Failures are logged here and degrade into `php_fpm_up 0` for status
    /// targets; script failures only lose that script's families.
    pub fn record(&mut self, target: &Target, result: ScrapeResult<TargetOutput>) {
        match result {
            Ok(TargetOutput::Status(observations)) => {
                self.succeeded += 1;
                self.push_up(&target.socket, true);
                for observation in &observations {
                    self.push_observation(&target.socket, observation);
                }
                debug!(target_id = %target, observations = observations.len(), "Scrape succeeded");
            }
            Ok(TargetOutput::Script(families)) => {
                self.succeeded += 1;
                debug!(target_id = %target, families = families.len(), "Scrape succeeded");
                for family in families {
                    self.merge_family(target, family);
                }
            }
            Err(e) => {
                self.failed += 1;
                warn!(
                    socket = %target.socket,
                    mode = target.mode_name(),
                    path = target.path(),
                    error_kind = e.kind(),
                    "Failed to scrape {}: {}",
                    target,
                    e
                );
                if target.is_status() {
                    self.push_up(&target.socket, false);
                }
            }
        }
    }

    /// Targets recorded with a successful result so far.
    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    /// Targets recorded with an error so far.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Returns the non-empty families of this cycle.
    pub fn finish(self) -> Vec<MetricFamily> {
        self.families
            .into_iter()
            .filter(|family| !family.get_metric().is_empty())
            .collect()
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn up_family_name() -> String {
    format!("{}_up", NAMESPACE)
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::core::{
        model::SCRIPT_LABEL,
        scrape::{error::ScrapeError, script::parse_exposition, script::relabel},
        transport::TransportError,
    };

    fn refused(socket: &str) -> ScrapeError {
        ScrapeError::Transport(TransportError::Connect {
            socket: socket.to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        })
    }

    fn find<'a>(families: &'a [MetricFamily], name: &str) -> Option<&'a MetricFamily> {
        families.iter().find(|f| f.get_name() == name)
    }

    fn script_output(socket: &str, script: &str, text: &str) -> TargetOutput {
        TargetOutput::Script(relabel(&parse_exposition(text).unwrap(), socket, script))
    }

    #[test]
    fn test_status_success_and_failure() {
        let mut aggregator = Aggregator::new();
        aggregator.record(
            &Target::status("/run/a.sock", "/status"),
            Ok(TargetOutput::Status(vec![
                Observation::gauge("idle_processes", 3.0),
                Observation::counter("accepted_connections_total", 100.0),
            ])),
        );
        aggregator.record(
            &Target::status("/run/b.sock", "/status"),
            Err(refused("/run/b.sock")),
        );
        assert_eq!(aggregator.succeeded(), 1);
        assert_eq!(aggregator.failed(), 1);

        let families = aggregator.finish();
        let names: Vec<_> = families.iter().map(|f| f.get_name()).collect();
        assert_eq!(
            names,
            vec![
                "php_fpm_up",
                "php_fpm_accepted_connections_total",
                "php_fpm_idle_processes"
            ]
        );

        let up = families[0].get_metric();
        assert_eq!(up.len(), 2);
        assert_eq!(up[0].label(SOCKET_LABEL), Some("/run/a.sock"));
        assert_eq!(up[0].value(), 1.0);
        assert_eq!(up[1].label(SOCKET_LABEL), Some("/run/b.sock"));
        assert_eq!(up[1].value(), 0.0);
        assert_eq!(families[0].get_help(), UP_HELP);

        let idle = find(&families, "php_fpm_idle_processes").unwrap();
        assert_eq!(idle.get_metric().len(), 1);
        assert_eq!(idle.get_metric()[0].label(SOCKET_LABEL), Some("/run/a.sock"));
        assert_eq!(idle.get_field_type(), MetricType::GAUGE);
        let accepted = find(&families, "php_fpm_accepted_connections_total").unwrap();
        assert_eq!(accepted.get_field_type(), MetricType::COUNTER);
        assert!(accepted.get_metric()[0].has_counter());
    }

    #[test]
    #[traced_test]
    fn test_failure_is_logged_with_target_and_cause() {
        let mut aggregator = Aggregator::new();
        aggregator.record(
            &Target::status("/run/b.sock", "/status"),
            Err(refused("/run/b.sock")),
        );
        assert!(logs_contain("Failed to scrape status /status via /run/b.sock"));
        assert!(logs_contain("transport"));
    }

    #[test]
    fn test_script_failure_does_not_touch_up() {
        let mut aggregator = Aggregator::new();
        aggregator.record(
            &Target::script("/run/a.sock", "/srv/m.php"),
            Err(ScrapeError::Task("boom".into())),
        );
        assert!(aggregator.finish().is_empty());
    }

    #[test]
    fn test_script_families_merge_across_sockets() {
        let mut aggregator = Aggregator::new();
        for socket in ["/run/a.sock", "/run/b.sock"] {
            aggregator.record(
                &Target::script(socket, "/srv/m.php"),
                Ok(script_output(socket, "/srv/m.php", "# HELP jobs Queued jobs.\n# TYPE jobs gauge\njobs 4\n")),
            );
        }
        let families = aggregator.finish();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_help(), "Queued jobs.");
        let sockets: Vec<_> = families[0]
            .get_metric()
            .iter()
            .map(|m| m.label(SOCKET_LABEL).unwrap())
            .collect();
        assert_eq!(sockets, vec!["/run/a.sock", "/run/b.sock"]);
        assert!(families[0]
            .get_metric()
            .iter()
            .all(|m| m.label(SCRIPT_LABEL) == Some("/srv/m.php")));
    }

    #[test]
    #[traced_test]
    fn test_conflicting_kind_is_dropped() {
        let mut aggregator = Aggregator::new();
        aggregator.record(
            &Target::script("/run/a.sock", "/srv/one.php"),
            Ok(script_output("/run/a.sock", "/srv/one.php", "# TYPE jobs gauge\njobs 4\n")),
        );
        aggregator.record(
            &Target::script("/run/a.sock", "/srv/two.php"),
            Ok(script_output("/run/a.sock", "/srv/two.php", "# TYPE jobs counter\njobs 9\n")),
        );

        let families = aggregator.finish();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].get_field_type(), MetricType::GAUGE);
        assert_eq!(families[0].get_metric().len(), 1);
        assert!(logs_contain("Dropping family"));
    }

    #[test]
    #[traced_test]
    fn test_script_cannot_write_into_status_families() {
        let mut aggregator = Aggregator::new();
        aggregator.record(
            &Target::status("/run/a.sock", "/status"),
            Ok(TargetOutput::Status(vec![Observation::gauge("idle_processes", 3.0)])),
        );
        aggregator.record(
            &Target::script("/run/a.sock", "/srv/m.php"),
            Ok(script_output(
                "/run/a.sock",
                "/srv/m.php",
                "# TYPE php_fpm_up gauge\nphp_fpm_up 0\n\
                 # TYPE php_fpm_idle_processes gauge\nphp_fpm_idle_processes 99\n\
                 # TYPE app_jobs gauge\napp_jobs 4\n",
            )),
        );

        let families = aggregator.finish();
        let up = find(&families, "php_fpm_up").unwrap().get_metric();
        assert_eq!(up.len(), 1);
        assert_eq!(up[0].value(), 1.0);
        assert_eq!(up[0].label(SCRIPT_LABEL), None);

        let idle = find(&families, "php_fpm_idle_processes").unwrap().get_metric();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].value(), 3.0);

        assert!(find(&families, "app_jobs").is_some());
        assert!(logs_contain("reserved for status metrics"));
    }

    #[test]
    fn test_script_only_socket_cannot_fake_up() {
        let mut aggregator = Aggregator::new();
        aggregator.record(
            &Target::script("/run/a.sock", "/srv/m.php"),
            Ok(script_output("/run/a.sock", "/srv/m.php", "php_fpm_up 1\n")),
        );
        assert!(aggregator.finish().is_empty());
    }

    #[test]
    fn test_empty_cycle_yields_nothing() {
        assert!(Aggregator::new().finish().is_empty());
    }
}
