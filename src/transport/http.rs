//! `reqwest`-backed transport.

use async_trait::async_trait;
use reqwest::Client;
use tracing::instrument;

use super::Transport;
use crate::Result;
use crate::types::{RawResponse, TransportRequest};

/// HTTP transport resolving relative URLs against a base URL.
///
/// Absolute URLs (`http://`, `https://`) are sent as-is.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport with a default `reqwest` client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a transport sharing an existing client (cookie store,
    /// default headers and TLS settings come with it).
    pub fn with_client(base_url: impl Into<String>, http: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a request URL against the base URL.
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{url}", self.base_url)
        } else {
            format!("{}/{url}", self.base_url)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(
        name = "http.send",
        skip(self, request),
        fields(method = %request.method, url = %request.url)
    )]
    async fn send(&self, request: &TransportRequest) -> Result<RawResponse> {
        let mut builder = self
            .http
            .request(request.method.into(), self.resolve(&request.url));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
