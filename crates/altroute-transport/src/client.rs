// # Reqwest Transport
//
// `TransportClient` over a reqwest client whose TLS stack carries the
// domain's pinning verifier. Errors are classified for the routing layer:
// pin failures, connectivity failures and everything else.

use altroute_core::error::{Error, Result};
use altroute_core::traits::{ApiRequest, ApiResponse, HttpMethod, TransportClient};
use async_trait::async_trait;

use crate::verifier::is_pin_mismatch;

/// HTTPS client bound to one domain
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    domain: String,
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Transport for `domain` reached at `base_url` (scheme and authority, no trailing slash)
    pub(crate) fn new(domain: impl Into<String>, base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            domain: domain.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn classify(&self, err: reqwest::Error) -> Error {
        if is_pin_mismatch(&err) {
            return Error::pin_mismatch(&self.domain);
        }

        if err.is_connect() || err.is_timeout() {
            return Error::unreachable(&self.domain, err.to_string());
        }

        Error::http(format!("{}: {}", self.domain, err))
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl TransportClient for ReqwestTransport {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut builder = self.client.request(method(request.method), self.url(&request.path));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        Ok(ApiResponse::new(status, body.to_vec()))
    }

    async fn probe(&self, path: &str) -> Result<()> {
        tracing::debug!("Probing {}", self.url(path));

        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::http(format!(
                "probe of {} returned {}",
                self.domain,
                response.status()
            )))
        }
    }
}
