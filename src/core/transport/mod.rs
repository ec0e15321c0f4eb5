//! Request/response access to PHP-FPM sockets.
//!
//! The scrape pipeline only needs one operation: send a single FastCGI
//! request to a socket and get the response body back. [`Transport`] is that
//! seam; [`FastCgiTransport`] is the production implementation and tests
//! plug in their own.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

pub mod fastcgi;

pub use fastcgi::FastCgiTransport;

/// Errors raised while talking to a socket.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The socket address could not be understood.
    #[error("Invalid socket address: {0}")]
    InvalidAddress(String),

    /// Connecting to the socket failed (missing file, refused, ...).
    #[error("Failed to connect to {socket}")]
    Connect {
        socket: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect plus exchange did not finish within the configured timeout.
    #[error("Timed out after {timeout:?} waiting for {socket}")]
    Timeout { socket: String, timeout: Duration },

    /// The FastCGI exchange itself failed.
    #[error("FastCGI exchange with {socket} failed: {reason}")]
    Protocol { socket: String, reason: String },

    /// PHP-FPM answered, but with an error status (e.g. unknown script).
    #[error("{socket} answered with status {status}: {body}")]
    Status {
        socket: String,
        status: u16,
        body: String,
    },
}

/// Where a socket identifier points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    /// Parses a configured socket identifier.
    ///
    /// `tcp://host:port` selects TCP; `unix://path` or a bare path selects a
    /// unix domain socket.
    pub fn parse(socket: &str) -> Result<Self, TransportError> {
        if let Some(addr) = socket.strip_prefix("tcp://") {
            return match addr.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                    Ok(Endpoint::Tcp(addr.to_string()))
                }
                _ => Err(TransportError::InvalidAddress(socket.to_string())),
            };
        }

        let path = socket.strip_prefix("unix://").unwrap_or(socket);
        if path.is_empty() {
            return Err(TransportError::InvalidAddress(socket.to_string()));
        }
        Ok(Endpoint::Unix(PathBuf::from(path)))
    }
}

/// The CGI parameters of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FcgiRequest {
    pub script_filename: String,
    pub script_name: String,
    pub request_uri: String,
    pub document_root: Option<String>,
}

impl FcgiRequest {
    /// Request for the pool status page served at `path`.
    pub fn status(path: &str) -> Self {
        Self {
            script_filename: path.to_string(),
            script_name: path.to_string(),
            request_uri: path.to_string(),
            document_root: None,
        }
    }

    /// Request executing the script file at `path`.
    ///
    /// The script's directory becomes the document root and its file name
    /// the script name, as a web server would set them.
    pub fn script(path: &str) -> Self {
        let file = Path::new(path);
        let script_name = match file.file_name() {
            Some(name) => format!("/{}", name.to_string_lossy()),
            None => path.to_string(),
        };
        let document_root = file
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.to_string_lossy().into_owned());

        Self {
            script_filename: path.to_string(),
            request_uri: script_name.clone(),
            script_name,
            document_root,
        }
    }
}

/// A single request/response exchange with a PHP-FPM socket.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` to `socket` and returns the response body.
    async fn request(&self, socket: &str, request: &FcgiRequest) -> Result<Vec<u8>, TransportError>;
}
