use std::time::Duration;

use async_trait::async_trait;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpRequest};
use crate::provider::{ModelTransport, RawEventStream};
use crate::types::{CompleteResponse, GenerationRequest};

use super::error::parse_bedrock_error;
use super::request::build_bedrock_body;
use super::response::map_response;
use super::stream::{collect_stream_text, create_stream};
use super::types::BedrockResponse;

const EVENT_STREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

/// Bedrock Runtime `InvokeModel` / `InvokeModelWithResponseStream` adapter.
///
/// Performs one HTTP exchange per call and classifies failures; retrying is left to
/// [`crate::client::LLMClient`].
pub struct BedrockProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) region: String,
    pub(crate) endpoint: Option<String>,
    pub(crate) bearer_token: Option<String>,
    pub(crate) timeout: Option<Duration>,
}

impl BedrockProvider {
    /// Targets the regional `bedrock-runtime` endpoint.
    pub fn new(transport: DynHttpTransport, region: impl Into<String>) -> Self {
        Self {
            transport,
            region: region.into(),
            endpoint: None,
            bearer_token: None,
            timeout: None,
        }
    }

    /// Overrides the endpoint, e.g. for a VPC endpoint or a local stub.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sends `Authorization: Bearer <token>` (Bedrock API keys).
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Deadline for non-streaming calls. Streams are bounded only by the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub(crate) fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", self.region),
        }
    }

    pub(crate) fn invoke_url(&self, model_id: &str) -> String {
        format!("{}/model/{}/invoke", self.base_url(), urlencoding::encode(model_id))
    }

    pub(crate) fn stream_url(&self, model_id: &str) -> String {
        format!(
            "{}/model/{}/invoke-with-response-stream",
            self.base_url(),
            urlencoding::encode(model_id)
        )
    }

    fn build_request(
        &self,
        url: String,
        accept: &str,
        request: &GenerationRequest,
    ) -> Result<HttpRequest, LLMError> {
        let body = build_bedrock_body(request)?;
        let mut http = HttpRequest::json(url, &body)?.header("Accept", accept);
        if let Some(token) = &self.bearer_token {
            http = http.header("Authorization", format!("Bearer {token}"));
        }
        Ok(http)
    }
}

#[async_trait]
impl ModelTransport for BedrockProvider {
    async fn invoke(&self, request: &GenerationRequest) -> Result<CompleteResponse, LLMError> {
        let mut http =
            self.build_request(self.invoke_url(request.model_id()), "application/json", request)?;
        if let Some(timeout) = self.timeout {
            http = http.with_timeout(timeout);
        }
        tracing::debug!(provider = self.name(), url = %http.url, "sending InvokeModel");

        let response = self.transport.send(http).await?;

        if !response.is_success() {
            let status = response.status;
            let headers = response.headers.clone();
            let text = response.into_string()?;
            return Err(parse_bedrock_error(self.name(), status, &headers, &text));
        }
        let text = response.into_string()?;

        let parsed: BedrockResponse = serde_json::from_str(&text).map_err(|err| {
            LLMError::provider(self.name(), format!("failed to parse Bedrock response: {err}"))
        })?;
        Ok(map_response(parsed))
    }

    async fn open_stream(&self, request: &GenerationRequest) -> Result<RawEventStream, LLMError> {
        let http = self.build_request(
            self.stream_url(request.model_id()),
            EVENT_STREAM_CONTENT_TYPE,
            request,
        )?;
        tracing::debug!(
            provider = self.name(),
            url = %http.url,
            "sending InvokeModelWithResponseStream"
        );

        let response = self.transport.send_stream(http).await?;

        if !response.is_success() {
            let text = collect_stream_text(response.body, self.name()).await?;
            return Err(parse_bedrock_error(
                self.name(),
                response.status,
                &response.headers,
                &text,
            ));
        }
        Ok(create_stream(response.body, self.name()))
    }

    fn name(&self) -> &'static str {
        "bedrock"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use futures_util::{StreamExt, stream};
    use serde_json::{Value, json};

    use super::*;
    use crate::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
    use crate::provider::bedrock::stream::tests::chunk_frame;
    use crate::types::Message;

    /// Replays canned responses and records every request it receives.
    #[derive(Default)]
    struct RecordingTransport {
        requests: Mutex<Vec<HttpRequest>>,
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
        frames: Vec<Vec<u8>>,
    }

    impl RecordingTransport {
        fn json(status: u16, body: Value) -> Self {
            Self {
                status,
                body: serde_json::to_vec(&body).expect("body"),
                ..Self::default()
            }
        }

        fn recorded(&self) -> Vec<HttpRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl HttpTransport for RecordingTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
            self.requests.lock().expect("lock").push(request);
            Ok(HttpResponse {
                status: self.status,
                headers: self.headers.clone(),
                body: self.body.clone(),
            })
        }

        async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            self.requests.lock().expect("lock").push(request);
            let chunks: Vec<Result<Vec<u8>, LLMError>> = if self.frames.is_empty() {
                vec![Ok(self.body.clone())]
            } else {
                self.frames.iter().cloned().map(Ok).collect()
            };
            Ok(HttpStreamResponse {
                status: self.status,
                headers: self.headers.clone(),
                body: Box::pin(stream::iter(chunks)),
            })
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::builder("anthropic.claude-3-sonnet-20240229-v1:0")
            .message(Message::user("Hello"))
            .build()
            .expect("request")
    }

    #[test]
    fn urls_encode_model_id_and_honor_endpoint_override() {
        let transport = Arc::new(RecordingTransport::default());
        let provider = BedrockProvider::new(transport.clone(), "eu-west-2");
        assert_eq!(
            provider.invoke_url("anthropic.claude-3-sonnet-20240229-v1:0"),
            "https://bedrock-runtime.eu-west-2.amazonaws.com/model/anthropic.claude-3-sonnet-20240229-v1%3A0/invoke"
        );

        let provider = provider.with_endpoint("http://localhost:4566/");
        assert_eq!(
            provider.stream_url("m"),
            "http://localhost:4566/model/m/invoke-with-response-stream"
        );
    }

    #[tokio::test]
    async fn invoke_posts_body_and_maps_response() {
        let transport = Arc::new(RecordingTransport::json(
            200,
            json!({
                "content": [{"type": "text", "text": "Hi there"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 5, "output_tokens": 2}
            }),
        ));
        let provider = BedrockProvider::new(transport.clone(), "us-east-1")
            .with_bearer_token("key-123")
            .with_timeout(Duration::from_secs(30));

        let response = provider.invoke(&request()).await.expect("response");
        assert_eq!(response.text, "Hi there");
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));

        let recorded = transport.recorded();
        assert_eq!(recorded.len(), 1);
        let sent = &recorded[0];
        assert!(sent.url.ends_with("/invoke"));
        assert_eq!(
            sent.headers.get("Authorization").map(String::as_str),
            Some("Bearer key-123")
        );
        assert_eq!(sent.timeout, Some(Duration::from_secs(30)));
        let body: Value = serde_json::from_slice(&sent.body).expect("json");
        assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(body["messages"][0]["content"][0]["text"], "Hello");
    }

    #[tokio::test]
    async fn invoke_classifies_http_errors() {
        let mut transport = RecordingTransport::json(
            503,
            json!({"message": "Bedrock is unable to process your request."}),
        );
        transport.headers.insert(
            "x-amzn-errortype".to_string(),
            "ServiceUnavailableException:http://internal.amazon.com/".to_string(),
        );
        let provider = BedrockProvider::new(Arc::new(transport), "us-east-1");

        let err = provider.invoke(&request()).await.expect_err("error");
        assert!(err.is_transient(), "expected transient, got {err:?}");
    }

    #[tokio::test]
    async fn open_stream_yields_decoded_events() {
        let transport = Arc::new(RecordingTransport {
            status: 200,
            frames: vec![
                chunk_frame(&json!({"type": "content_block_delta", "delta": {"text": "Hel"}})),
                chunk_frame(&json!({"type": "content_block_delta", "delta": {"text": "lo"}})),
                chunk_frame(&json!({"type": "message_stop"})),
            ],
            ..RecordingTransport::default()
        });
        let provider = BedrockProvider::new(transport.clone(), "us-east-1");

        let events: Vec<Value> = provider
            .open_stream(&request())
            .await
            .expect("stream")
            .map(|event| event.expect("event"))
            .collect()
            .await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["delta"]["text"], "Hel");

        let recorded = transport.recorded();
        assert!(recorded[0].url.ends_with("/invoke-with-response-stream"));
        assert_eq!(
            recorded[0].headers.get("Accept").map(String::as_str),
            Some(EVENT_STREAM_CONTENT_TYPE)
        );
    }

    #[tokio::test]
    async fn open_stream_reports_permanent_http_errors() {
        let transport = RecordingTransport::json(
            403,
            json!({"__type": "AccessDeniedException", "message": "denied"}),
        );
        let provider = BedrockProvider::new(Arc::new(transport), "us-east-1");

        let err = match provider.open_stream(&request()).await {
            Ok(_) => panic!("expected error"),
            Err(err) => err,
        };
        assert!(matches!(err, LLMError::Auth { .. }), "unexpected error: {err:?}");
    }
}
