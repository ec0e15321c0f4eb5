//! Configured scrape targets.
//!
//! A target pairs one socket with one scrape mode. A socket with a status
//! path and N script paths yields N + 1 independent targets, so a broken
//! script never hides the pool status and vice versa.

use std::fmt;

use tracing::trace;

use super::{
    script::{parse_exposition, relabel},
    status::parse_status,
    types::{ScrapeResult, TargetOutput},
};
use crate::{
    config::phpfpm::PhpFpmConfig,
    core::transport::{FcgiRequest, Transport},
};

/// What to ask a socket for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeMode {
    /// Fetch the pool status page served at this path.
    Status { path: String },
    /// Execute this script and read its exposition output.
    Script { path: String },
}

/// One socket × scrape mode combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub socket: String,
    pub mode: ScrapeMode,
}

impl Target {
    /// A status-page target for `socket`.
    pub fn status(socket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
            mode: ScrapeMode::Status { path: path.into() },
        }
    }

    /// A metrics-script target for `socket`.
    pub fn script(socket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
            mode: ScrapeMode::Script { path: path.into() },
        }
    }

    /// Whether this target reports `php_fpm_up`.
    pub fn is_status(&self) -> bool {
        matches!(self.mode, ScrapeMode::Status { .. })
    }

    /// Short mode name for logs.
    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            ScrapeMode::Status { .. } => "status",
            ScrapeMode::Script { .. } => "script",
        }
    }

    /// Status path or script path, depending on the mode.
    pub fn path(&self) -> &str {
        match &self.mode {
            ScrapeMode::Status { path } | ScrapeMode::Script { path } => path,
        }
    }

    /// The FastCGI request this target sends.
    pub fn request(&self) -> FcgiRequest {
        match &self.mode {
            ScrapeMode::Status { path } => FcgiRequest::status(path),
            ScrapeMode::Script { path } => FcgiRequest::script(path),
        }
    }

    /// Performs one scrape: a single request followed by parsing.
    pub async fn scrape(&self, transport: &dyn Transport) -> ScrapeResult<TargetOutput> {
        let body = transport.request(&self.socket, &self.request()).await?;
        let text = String::from_utf8(body)?;
        trace!(target_id = %self, bytes = text.len(), "Parsing response");

        match &self.mode {
            ScrapeMode::Status { .. } => Ok(TargetOutput::Status(parse_status(&text)?)),
            ScrapeMode::Script { path } => {
                let families = parse_exposition(&text)?;
                Ok(TargetOutput::Script(relabel(&families, &self.socket, path)))
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} via {}", self.mode_name(), self.path(), self.socket)
    }
}

/// The immutable, ordered list of targets built at startup.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    /// Wraps an explicit target list, kept in the given order.
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// Expands the configuration into targets, in configuration order:
    /// for every socket its status target first, then one target per script.
    pub fn from_config(config: &PhpFpmConfig) -> Self {
        let mut targets = Vec::new();
        for socket in &config.sockets {
            if let Some(path) = config.status_path() {
                targets.push(Target::status(socket.as_str(), path));
            }
            for script in &config.script_paths {
                targets.push(Target::script(socket.as_str(), script.as_str()));
            }
        }
        Self { targets }
    }

    /// All targets in scrape order.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Number of targets scraped per cycle.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Number of targets that report availability.
    pub fn status_target_count(&self) -> usize {
        self.targets.iter().filter(|t| t.is_status()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;
    use crate::core::{
        model::{MetricExt, MetricType, Observation, SCRIPT_LABEL, SOCKET_LABEL},
        scrape::error::ScrapeError,
        transport::TransportError,
    };

    /// Transport answering from a fixed table and recording requests.
    #[derive(Default)]
    struct TableTransport {
        responses: HashMap<(String, String), Vec<u8>>,
        seen: Mutex<Vec<FcgiRequest>>,
    }

    impl TableTransport {
        fn with(mut self, socket: &str, script: &str, body: &str) -> Self {
            self.responses
                .insert((socket.into(), script.into()), body.as_bytes().to_vec());
            self
        }
    }

    #[async_trait::async_trait]
    impl Transport for TableTransport {
        async fn request(
            &self,
            socket: &str,
            request: &FcgiRequest,
        ) -> Result<Vec<u8>, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.responses
                .get(&(socket.to_string(), request.script_filename.clone()))
                .cloned()
                .ok_or_else(|| TransportError::Connect {
                    socket: socket.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                })
        }
    }

    fn config(sockets: &[&str], status: &str, scripts: &[&str]) -> PhpFpmConfig {
        PhpFpmConfig {
            sockets: sockets.iter().map(|s| s.to_string()).collect(),
            status_path: status.to_string(),
            script_paths: scripts.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_expansion_order() {
        let registry = TargetRegistry::from_config(&config(
            &["/run/a.sock", "/run/b.sock"],
            "/status",
            &["/srv/m1.php", "/srv/m2.php"],
        ));

        assert_eq!(
            registry.targets(),
            &[
                Target::status("/run/a.sock", "/status"),
                Target::script("/run/a.sock", "/srv/m1.php"),
                Target::script("/run/a.sock", "/srv/m2.php"),
                Target::status("/run/b.sock", "/status"),
                Target::script("/run/b.sock", "/srv/m1.php"),
                Target::script("/run/b.sock", "/srv/m2.php"),
            ]
        );
        assert_eq!(registry.status_target_count(), 2);
    }

    #[test]
    fn test_registry_without_status_path() {
        let registry = TargetRegistry::from_config(&config(&["/run/a.sock"], "", &["/srv/m.php"]));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.status_target_count(), 0);
    }

    #[test]
    fn test_registry_without_any_mode_is_empty() {
        let registry = TargetRegistry::from_config(&config(&["/run/a.sock"], "", &[]));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_target_display() {
        let target = Target::script("/run/a.sock", "/srv/m.php");
        assert_eq!(target.to_string(), "script /srv/m.php via /run/a.sock");
    }

    #[tokio::test]
    async fn test_status_scrape() {
        let transport = TableTransport::default().with(
            "/run/a.sock",
            "/status",
            "pool: www\nidle processes: 3\naccepted conn: 9\n",
        );
        let output = Target::status("/run/a.sock", "/status")
            .scrape(&transport)
            .await
            .unwrap();

        assert_eq!(
            output,
            TargetOutput::Status(vec![
                Observation::gauge("idle_processes", 3.0),
                Observation::counter("accepted_connections_total", 9.0),
            ])
        );
        assert_eq!(transport.seen.lock().unwrap()[0], FcgiRequest::status("/status"));
    }

    #[tokio::test]
    async fn test_status_scrape_with_bad_content() {
        let transport =
            TableTransport::default().with("/run/a.sock", "/status", "File not found.\n");
        let err = Target::status("/run/a.sock", "/status")
            .scrape(&transport)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Status(_)));
        assert_eq!(err.kind(), "status_content");
    }

    #[tokio::test]
    async fn test_status_scrape_transport_failure() {
        let err = Target::status("/run/gone.sock", "/status")
            .scrape(&TableTransport::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Transport(_)));
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn test_script_scrape_relabels() {
        let transport = TableTransport::default().with(
            "/run/a.sock",
            "/srv/app/metrics.php",
            "# TYPE app_users gauge\napp_users{tier=\"free\"} 10\n",
        );
        let output = Target::script("/run/a.sock", "/srv/app/metrics.php")
            .scrape(&transport)
            .await
            .unwrap();

        let TargetOutput::Script(families) = output else {
            panic!("expected script output");
        };
        assert_eq!(families[0].get_field_type(), MetricType::GAUGE);
        let metric = &families[0].get_metric()[0];
        assert_eq!(metric.label("tier"), Some("free"));
        assert_eq!(metric.label(SOCKET_LABEL), Some("/run/a.sock"));
        assert_eq!(metric.label(SCRIPT_LABEL), Some("/srv/app/metrics.php"));

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].document_root.as_deref(), Some("/srv/app"));
        assert_eq!(seen[0].script_name, "/metrics.php");
    }

    #[tokio::test]
    async fn test_script_scrape_with_bad_output() {
        let transport =
            TableTransport::default().with("/run/a.sock", "/srv/m.php", "Fatal error: oops\n");
        let err = Target::script("/run/a.sock", "/srv/m.php")
            .scrape(&transport)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Exposition(_)));
    }

    #[tokio::test]
    async fn test_non_utf8_body_is_rejected() {
        let mut transport = TableTransport::default();
        transport
            .responses
            .insert(("/run/a.sock".into(), "/status".into()), vec![0xff, 0xfe]);
        let err = Target::status("/run/a.sock", "/status")
            .scrape(&transport)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Encoding(_)));
    }
}
