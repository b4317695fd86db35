// # Transport Traits
//
// A transport is an HTTPS client bound to exactly one domain, with the pin
// policy for that domain enforced during the TLS handshake.
//
// - `TransportConnector` builds transports (no network I/O on build)
// - `TransportClient` issues requests and probes through one transport
//
// ## Implementations
//
// - reqwest + rustls: `altroute-transport` crate

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

use crate::pinning::PinPolicy;

/// HTTP method for an API request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Method name as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-independent API request
///
/// The path is relative; the transport supplies scheme and host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Path and query, starting with `/`
    pub path: String,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// Optional body
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    /// Create a request with no headers or body
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// POST request with a body
    pub fn post(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    /// Attach a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Raw API response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8 text (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize a JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, crate::Error> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// An HTTPS client bound to one domain
///
/// # Errors
///
/// Implementations must classify failures so the routing layer can react:
///
/// - connect, DNS, TLS transport and timeout failures: [`crate::Error::Unreachable`]
/// - certificate pin verification failure: [`crate::Error::PinMismatch`]
/// - anything else: [`crate::Error::Http`]
///
/// Non-2xx statuses are returned as responses from `execute`, not errors.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Domain this client is bound to
    fn domain(&self) -> &str;

    /// Issue one request
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, crate::Error>;

    /// Lightweight reachability probe
    ///
    /// Succeeds when the TLS handshake (including pin checks) completes and the
    /// server answers `path` with a 2xx status.
    async fn probe(&self, path: &str) -> Result<(), crate::Error>;
}

/// Builds transports for a domain under a given pin policy
///
/// Building must not perform network I/O; connection happens on first use.
pub trait TransportConnector: Send + Sync {
    /// Build a transport for `domain` enforcing `policy`
    fn connect(
        &self,
        domain: &str,
        policy: &PinPolicy,
    ) -> Result<Arc<dyn TransportClient>, crate::Error>;
}
