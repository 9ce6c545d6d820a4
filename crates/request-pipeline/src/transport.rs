//! reqwest-backed transport
//!
//! Joins the request path onto the API base URL, sends headers and the JSON
//! body, and reads the whole response body. Status codes are not interpreted
//! here; a 500 is as much a response as a 200.

use reqwest::header::{ACCEPT, HeaderValue};
use tracing::debug;

use crate::error::TransportError;
use crate::middleware::{BoxFuture, Transport};
use crate::request::{ApiRequest, ApiResponse, body_from_bytes};

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URLs pass through; anything else is relative to the base URL.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> BoxFuture<'a, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            let url = self.url_for(&request.path);

            let mut headers = request.headers.clone();
            headers
                .entry(ACCEPT)
                .or_insert(HeaderValue::from_static("application/json"));

            let mut builder = self
                .client
                .request(request.method.clone(), url.as_str())
                .headers(headers);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let bytes = response.bytes().await?;
            debug!(method = %request.method, url = %url, status, bytes = bytes.len(), "response received");

            Ok(ApiResponse {
                status,
                headers,
                body: body_from_bytes(&bytes),
            })
        })
    }
}
