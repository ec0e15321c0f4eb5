// ============================================================================
// fastcgi.rs
// ============================================================================
//! FastCGI transport backed by the `fastcgi-client` crate.
//!
//! Every request opens a fresh connection, sends one `GET` and closes the
//! connection again. The whole exchange, connect included, is bounded by the
//! configured timeout so a hung pool cannot stall a collection cycle.

use std::time::Duration;

use fastcgi_client::{Client, Params, Request};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::{debug, trace, warn};

use super::{Endpoint, FcgiRequest, Transport, TransportError};

/// Status assumed when PHP-FPM sends no `Status:` header.
const DEFAULT_STATUS: u16 = 200;

/// Longest response excerpt quoted in a status error.
const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, Clone)]
pub struct FastCgiTransport {
    timeout: Duration,
}

impl FastCgiTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect_and_exchange(
        &self,
        socket: &str,
        request: &FcgiRequest,
    ) -> Result<Vec<u8>, TransportError> {
        let connect_error = |source| TransportError::Connect {
            socket: socket.to_string(),
            source,
        };

        match Endpoint::parse(socket)? {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str())
                    .await
                    .map_err(connect_error)?;
                exchange(stream, socket, request).await
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(&path)
                    .await
                    .map_err(connect_error)?;
                exchange(stream, socket, request).await
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::InvalidAddress(format!(
                "{socket}: unix sockets are not supported on this platform"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Transport for FastCgiTransport {
    async fn request(&self, socket: &str, request: &FcgiRequest) -> Result<Vec<u8>, TransportError> {
        trace!(socket, script = %request.script_filename, "Sending FastCGI request");
        match tokio::time::timeout(self.timeout, self.connect_and_exchange(socket, request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                socket: socket.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

async fn exchange<S>(stream: S, socket: &str, request: &FcgiRequest) -> Result<Vec<u8>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client = Client::new(stream);

    let mut params = Params::default()
        .request_method("GET")
        .script_filename(request.script_filename.as_str())
        .script_name(request.script_name.as_str())
        .request_uri(request.request_uri.as_str())
        .document_uri(request.script_name.as_str())
        .query_string("")
        .server_name("localhost")
        .remote_addr("127.0.0.1")
        .content_type("")
        .content_length(0);
    if let Some(root) = &request.document_root {
        params = params.document_root(root.as_str());
    }

    let output = client
        .execute_once(Request::new(params, &mut tokio::io::empty()))
        .await
        .map_err(|e| TransportError::Protocol {
            socket: socket.to_string(),
            reason: e.to_string(),
        })?;

    if let Some(stderr) = output.stderr.filter(|s| !s.is_empty()) {
        warn!(
            socket,
            script = %request.script_filename,
            "PHP-FPM reported on stderr: {}",
            String::from_utf8_lossy(&stderr).trim()
        );
    }

    let response = CgiResponse::parse(&output.stdout.unwrap_or_default());
    debug!(
        socket,
        script = %request.script_filename,
        status = response.status,
        bytes = response.body.len(),
        "FastCGI response received"
    );

    if response.status >= 400 {
        let body = String::from_utf8_lossy(&response.body);
        return Err(TransportError::Status {
            socket: socket.to_string(),
            status: response.status,
            body: body.trim().chars().take(MAX_ERROR_BODY).collect(),
        });
    }
    Ok(response.body)
}

/// A CGI response split into status and body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CgiResponse {
    status: u16,
    body: Vec<u8>,
}

impl CgiResponse {
    /// Separates the CGI header block from the body.
    ///
    /// Output without a header block is taken as a bare body.
    fn parse(raw: &[u8]) -> Self {
        let Some((header_len, separator_len)) = find_header_end(raw) else {
            return Self {
                status: DEFAULT_STATUS,
                body: raw.to_vec(),
            };
        };

        let headers = String::from_utf8_lossy(&raw[..header_len]);
        let status = headers
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("status"))
            .and_then(|(_, value)| value.split_whitespace().next()?.parse::<u16>().ok())
            .unwrap_or(DEFAULT_STATUS);

        Self {
            status,
            body: raw[header_len + separator_len..].to_vec(),
        }
    }
}

/// Position and length of the blank line ending the header block.
fn find_header_end(raw: &[u8]) -> Option<(usize, usize)> {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    let lf = raw.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}
