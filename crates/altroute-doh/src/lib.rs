//! RFC 8484 DNS-over-HTTPS provider
//!
//! Implements [`DohProvider`] for any DoH endpoint that speaks the
//! `application/dns-message` wire format. Queries go out as GET with the
//! message in the `dns` parameter (base64url, unpadded), or as POST with the
//! message as the body. Messages use id 0 so responses stay cacheable.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use altroute_core::DohProvider;
//! use altroute_doh::Rfc8484Provider;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Rfc8484Provider::new("https://dns11.quad9.net/dns-query")?;
//!     let strings = provider.query_txt("dmfygsltfpbqw24dmmu.routing.example.net").await?;
//!     println!("{:?}", strings);
//!     Ok(())
//! }
//! ```

use altroute_core::config::DohProviderConfig;
use altroute_core::error::{Error, Result};
use altroute_core::traits::{DohProvider, DohProviderFactory};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};

const DNS_MESSAGE: &str = "application/dns-message";

/// How the DNS message is carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DohMethod {
    /// `?dns=` query parameter
    #[default]
    Get,
    /// Request body
    Post,
}

/// DoH provider for one endpoint
#[derive(Debug, Clone)]
pub struct Rfc8484Provider {
    url: String,
    method: DohMethod,
    client: reqwest::Client,
}

impl Rfc8484Provider {
    /// Provider for `url` with a default HTTP client
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("altroute/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build DoH HTTP client: {}", e)))?;
        Ok(Self::with_client(url, client))
    }

    /// Provider for `url` sharing an existing HTTP client
    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            method: DohMethod::Get,
            client,
        }
    }

    /// Use POST instead of GET
    pub fn with_method(mut self, method: DohMethod) -> Self {
        self.method = method;
        self
    }

    fn failed(&self, message: impl Into<String>) -> Error {
        Error::doh_query_failed(&self.url, message)
    }

    fn get_url(&self, query: &[u8]) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}dns={}", self.url, separator, URL_SAFE_NO_PAD.encode(query))
    }

    async fn exchange(&self, query: Vec<u8>) -> Result<Vec<u8>> {
        let request = match self.method {
            DohMethod::Get => self.client.get(self.get_url(&query)),
            DohMethod::Post => self
                .client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, DNS_MESSAGE)
                .body(query),
        };

        let response = request
            .header(reqwest::header::ACCEPT, DNS_MESSAGE)
            .send()
            .await
            .map_err(|e| self.failed(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(self.failed(format!("server returned {}", response.status())));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.failed(format!("failed to read response: {}", e)))?;

        Ok(body.to_vec())
    }
}

/// Encode a recursive TXT query for `name`
pub fn build_txt_query(name: &str) -> Result<Vec<u8>> {
    let name = Name::from_ascii(name)
        .map_err(|e| Error::invalid_input(format!("Invalid query name {}: {}", name, e)))?;

    let mut message = Message::new();
    message.set_id(0);
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(Query::query(name, RecordType::TXT));

    message
        .to_vec()
        .map_err(|e| Error::invalid_input(format!("Failed to encode DNS query: {}", e)))
}

/// Extract every TXT character-string from a DNS response
///
/// Fails on undecodable messages and on any response code but NOERROR.
pub fn parse_txt_answer(response: &[u8]) -> std::result::Result<Vec<String>, String> {
    let message =
        Message::from_vec(response).map_err(|e| format!("malformed DNS response: {}", e))?;

    if message.response_code() != ResponseCode::NoError {
        return Err(format!("response code {}", message.response_code()));
    }

    let strings = message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            RData::TXT(txt) => Some(txt),
            _ => None,
        })
        .flat_map(|txt| txt.txt_data().iter())
        .map(|data| String::from_utf8_lossy(data).into_owned())
        .collect();

    Ok(strings)
}

#[async_trait]
impl DohProvider for Rfc8484Provider {
    async fn query_txt(&self, name: &str) -> Result<Vec<String>> {
        let query = build_txt_query(name).map_err(|e| self.failed(e.to_string()))?;
        let response = self.exchange(query).await?;
        let strings = parse_txt_answer(&response).map_err(|e| self.failed(e))?;

        tracing::debug!("{} answered {} TXT string(s) for {}", self.url, strings.len(), name);
        Ok(strings)
    }

    fn provider_name(&self) -> &str {
        &self.url
    }
}

/// Builds [`Rfc8484Provider`]s sharing one HTTP client
#[derive(Debug, Clone)]
pub struct Rfc8484ProviderFactory {
    client: reqwest::Client,
    method: DohMethod,
}

impl Rfc8484ProviderFactory {
    /// Factory with a default HTTP client
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("altroute/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build DoH HTTP client: {}", e)))?;
        Ok(Self {
            client,
            method: DohMethod::Get,
        })
    }

    /// Use POST for every provider
    pub fn with_method(mut self, method: DohMethod) -> Self {
        self.method = method;
        self
    }
}

impl DohProviderFactory for Rfc8484ProviderFactory {
    fn create(&self, config: &DohProviderConfig) -> Result<Box<dyn DohProvider>> {
        config.validate()?;
        Ok(Box::new(
            Rfc8484Provider::with_client(&config.query_template_url, self.client.clone())
                .with_method(self.method),
        ))
    }
}
