use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::LLMError;

use super::{DynHttpTransport, HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("wilma-llm/", env!("CARGO_PKG_VERSION"));

/// [`HttpTransport`] backed by a pooled `reqwest` [`Client`].
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wraps a caller-configured client, e.g. one routed through a signing proxy.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client with a connect timeout and this crate's user agent.
    pub fn default_client() -> Result<Self, LLMError> {
        Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map(Self::new)
            .map_err(|err| LLMError::transport(format!("failed to create reqwest client: {err}")))
    }

    async fn execute(&self, request: HttpRequest) -> Result<reqwest::Response, LLMError> {
        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| LLMError::transport(format!("invalid header name {name}: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| LLMError::transport(format!("invalid value for header {name}: {err}")))?;
            headers.insert(name, value);
        }

        let mut builder = self.client.post(&request.url).headers(headers).body(request.body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder.send().await.map_err(network_error)
    }
}

/// Network failures are never the service saying it is unavailable, so they stay permanent.
fn network_error(err: reqwest::Error) -> LLMError {
    let kind = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_body() || err.is_decode() {
        "failed to read response body"
    } else {
        "request failed"
    };
    LLMError::transport(format!("{kind}: {err}"))
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let response = self.execute(request).await?;
        let status = response.status().as_u16();
        let headers = headers_to_map(response.headers());
        let body = response.bytes().await.map_err(network_error)?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let response = self.execute(request).await?;
        let status = response.status().as_u16();
        let headers = headers_to_map(response.headers());
        let body: HttpBodyStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(network_error)),
        );
        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Builds the default transport behind a thread-safe handle.
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
