//! HTTP exposition server.
//!
//! Every request to the telemetry path runs one collection cycle through the
//! [`Exporter`] and renders the result in the text format. `/` serves a small
//! landing page and `/healthz` a liveness probe.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{debug, error, info};

use crate::{config::web::HEALTH_PATH, core::exporter::Exporter};

pub mod encode;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub exporter: Arc<Exporter>,
    pub telemetry_path: String,
}

/// Creates the application router.
pub fn create_router(state: AppState) -> Router {
    let telemetry_path = state.telemetry_path.clone();
    let app_state = Arc::new(state);

    Router::new()
        .route("/", get(landing_handler))
        .route(HEALTH_PATH, get(healthz_handler))
        .route(&telemetry_path, get(metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(app_state)
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn landing_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>PHP-FPM Exporter</title></head>\n\
         <body>\n\
         <h1>PHP-FPM Exporter</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        path = state.telemetry_path
    ))
}

/// Liveness probe.
async fn healthz_handler() -> &'static str {
    "ok"
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let families = state.exporter.collect().await;
    let count = families.len();
    match encode::encode(families) {
        Ok(body) => {
            debug!(families = count, bytes = body.len(), "Serving metrics");
            ([(header::CONTENT_TYPE, encode::CONTENT_TYPE)], body).into_response()
        }
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::core::{
        scrape::targets::{Target, TargetRegistry},
        transport::{FcgiRequest, Transport, TransportError},
    };

    /// Answers every request to `/run/up.sock` with a status page and
    /// refuses everything else.
    struct FixedTransport;

    #[async_trait::async_trait]
    impl Transport for FixedTransport {
        async fn request(
            &self,
            socket: &str,
            _request: &FcgiRequest,
        ) -> Result<Vec<u8>, TransportError> {
            if socket == "/run/up.sock" {
                return Ok(b"pool: www\naccepted conn: 12\nidle processes: 2\n".to_vec());
            }
            Err(TransportError::Connect {
                socket: socket.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    fn router(telemetry_path: &str) -> Router {
        let registry = TargetRegistry::new(vec![
            Target::status("/run/up.sock", "/status"),
            Target::status("/run/down.sock", "/status"),
        ]);
        create_router(AppState {
            exporter: Arc::new(Exporter::new(Arc::new(FixedTransport), registry, 0)),
            telemetry_path: telemetry_path.to_string(),
        })
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (status, content_type, body) = get(router("/metrics"), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(encode::CONTENT_TYPE));
        assert!(body.contains("# TYPE php_fpm_up gauge\n"));
        assert!(body.contains("php_fpm_up{socket_path=\"/run/up.sock\"} 1\n"));
        assert!(body.contains("php_fpm_up{socket_path=\"/run/down.sock\"} 0\n"));
        assert!(body.contains("# TYPE php_fpm_accepted_connections_total counter\n"));
        assert!(body.contains("php_fpm_accepted_connections_total{socket_path=\"/run/up.sock\"} 12\n"));
        assert!(!body.contains("php_fpm_idle_processes{socket_path=\"/run/down.sock\"}"));
    }

    #[tokio::test]
    async fn test_custom_telemetry_path() {
        let (status, _, _) = get(router("/fpm"), "/fpm").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = get(router("/fpm"), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_landing_page_links_metrics() {
        let (status, content_type, body) = get(router("/fpm"), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.unwrap().starts_with("text/html"));
        assert!(body.contains("<a href=\"/fpm\">Metrics</a>"));
    }

    #[tokio::test]
    async fn test_healthz() {
        let (status, _, body) = get(router("/metrics"), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
