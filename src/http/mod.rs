//! HTTP seam under the Bedrock adapter.
//!
//! Bedrock Runtime is driven purely by JSON `POST`s, so requests carry no method. A
//! transport performs exactly one exchange per call and never retries.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;

use crate::error::LLMError;

pub mod reqwest;

/// JSON `POST` handed to an [`HttpTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Deadline for the whole exchange; `None` leaves it to the transport.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Serializes `body` and sets `Content-Type: application/json`.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Validation`] when `body` cannot be serialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use wilma_llm::http::HttpRequest;
    ///
    /// let request = HttpRequest::json("https://example.com", &serde_json::json!({"a": 1}))
    ///     .unwrap()
    ///     .header("Accept", "application/json");
    /// assert_eq!(request.body, br#"{"a":1}"#.to_vec());
    /// assert_eq!(request.headers.len(), 2);
    /// ```
    pub fn json<T: Serialize + ?Sized>(url: impl Into<String>, body: &T) -> Result<Self, LLMError> {
        let body = serde_json::to_vec(body).map_err(|err| LLMError::Validation {
            message: format!("failed to serialize request: {err}"),
        })?;
        Ok(Self {
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body,
            timeout: None,
        })
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Fully buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// # Errors
    ///
    /// Returns [`LLMError::Transport`] when the body is not UTF-8.
    pub fn into_string(self) -> Result<String, LLMError> {
        String::from_utf8(self.body).map_err(|err| LLMError::transport(err.to_string()))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }
}

/// Body of a streaming response, delivered as it arrives.
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LLMError>> + Send>>;

/// Response whose body is still being received.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

impl HttpStreamResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }
}

/// Client-side HTTP implementation used by [`crate::provider::bedrock::BedrockProvider`].
///
/// Implementations must be safe for concurrent use and map network failures to
/// [`LLMError::Transport`]; HTTP error statuses are returned as ordinary responses.
///
/// # Examples
///
/// ```
/// # use async_trait::async_trait;
/// # use wilma_llm::http::{HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
/// # use wilma_llm::error::LLMError;
/// # use futures_util::stream;
/// struct Echo;
///
/// #[async_trait]
/// impl HttpTransport for Echo {
///     async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
///         Ok(HttpResponse { status: 200, headers: request.headers, body: request.body })
///     }
///     async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
///         let body = request.body;
///         Ok(HttpStreamResponse {
///             status: 200,
///             headers: request.headers,
///             body: Box::pin(stream::iter(vec![Ok(body)])),
///         })
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let request = HttpRequest::json("https://example.com", "ping").unwrap();
/// let response = Echo.send(request).await.unwrap();
/// assert_eq!(response.into_string().unwrap(), r#""ping""#);
/// # });
/// ```
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError>;

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError>;
}

pub type DynHttpTransport = Arc<dyn HttpTransport>;

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Case-insensitive lookup in a header map.
pub(crate) fn header_value<'a>(
    headers: &'a HashMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
