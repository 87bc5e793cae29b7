use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{Value, json};
use wilma_llm::{
    Chunk, ChunkKind, CompleteResponse, GenerationRequest, LLMClient, LLMError, Message,
    ModelTransport, RawEventStream, RetryConfig, StreamItem,
};

type Events = Vec<Result<Value, LLMError>>;

/// Fake transport that replays scripted outcomes and records every request it sees.
#[derive(Default)]
struct FakeTransport {
    invokes: Mutex<VecDeque<Result<CompleteResponse, LLMError>>>,
    opens: Mutex<VecDeque<Result<Events, LLMError>>>,
    seen: Mutex<Vec<GenerationRequest>>,
}

impl FakeTransport {
    fn with_invokes(outcomes: Vec<Result<CompleteResponse, LLMError>>) -> Arc<Self> {
        Arc::new(Self {
            invokes: Mutex::new(outcomes.into()),
            ..Self::default()
        })
    }

    fn with_streams(opens: Vec<Result<Events, LLMError>>) -> Arc<Self> {
        Arc::new(Self {
            opens: Mutex::new(opens.into()),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().expect("lock").len()
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.seen.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ModelTransport for FakeTransport {
    async fn invoke(&self, request: &GenerationRequest) -> Result<CompleteResponse, LLMError> {
        self.seen.lock().expect("lock").push(request.clone());
        let next = self.invokes.lock().expect("lock").pop_front();
        next.unwrap_or_else(|| Err(transient()))
    }

    async fn open_stream(&self, request: &GenerationRequest) -> Result<RawEventStream, LLMError> {
        self.seen.lock().expect("lock").push(request.clone());
        let next = self.opens.lock().expect("lock").pop_front();
        match next.unwrap_or_else(|| Err(transient())) {
            Ok(events) => Ok(Box::pin(stream::iter(events))),
            Err(err) => Err(err),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

fn transient() -> LLMError {
    LLMError::Transient {
        message: "ServiceUnavailableException: Bedrock is unable to process your request"
            .to_string(),
    }
}

fn client(transport: Arc<FakeTransport>, max_attempts: u32) -> LLMClient {
    LLMClient::builder(transport)
        .retry_config(RetryConfig::with_max_attempts(max_attempts))
        .rng_seed(5)
        .build()
        .expect("client")
}

fn request(stream: bool) -> GenerationRequest {
    GenerationRequest::builder("anthropic.claude-3-sonnet-20240229-v1:0")
        .messages([
            Message::user("What is Rust?"),
            Message::assistant("A systems language."),
            Message::user("Say hello."),
        ])
        .system("Answer briefly.")
        .stream(stream)
        .build()
        .expect("request")
}

fn fixture_events() -> Events {
    vec![
        Ok(json!({"delta": {"text": "Hel"}})),
        Ok(json!({"delta": {"text": "lo"}})),
        Ok(json!({"type": "message_stop"})),
    ]
}

#[tokio::test(start_paused = true)]
async fn invoke_gives_up_after_three_retries() {
    let transport = FakeTransport::with_invokes(Vec::new());
    let started = tokio::time::Instant::now();

    let err = client(transport.clone(), 3)
        .invoke(&request(false))
        .await
        .expect_err("should exhaust retries");

    match &err {
        LLMError::MaxRetriesExceeded { retries, source } => {
            assert_eq!(*retries, 3);
            assert!(source.is_transient());
        }
        other => panic!("expected MaxRetriesExceeded, got {other:?}"),
    }
    assert!(err.to_string().contains("unable to process"));
    assert_eq!(transport.calls(), 4);
    // 1s + 2s + 4s of un-jittered backoff at minimum.
    assert!(started.elapsed() >= Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn invoke_succeeds_after_two_transient_failures() {
    let transport = FakeTransport::with_invokes(vec![
        Err(transient()),
        Err(transient()),
        Ok(CompleteResponse::from_text("Hello")),
    ]);

    let response = client(transport.clone(), 3)
        .invoke(&request(false))
        .await
        .expect("should succeed on third call");

    assert_eq!(response.text, "Hello");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn invoke_never_retries_permanent_errors() {
    for err in [
        LLMError::Auth {
            message: "AccessDeniedException: no access".to_string(),
        },
        LLMError::Validation {
            message: "ValidationException: Malformed input request".to_string(),
        },
        LLMError::ModelNotFound {
            model: Some("anthropic.claude-bogus".to_string()),
            message: "ResourceNotFoundException".to_string(),
        },
    ] {
        let transport = FakeTransport::with_invokes(vec![Err(err)]);
        let result = client(transport.clone(), 3).invoke(&request(false)).await;
        let returned = result.expect_err("permanent error");
        assert!(returned.is_permanent(), "unexpected error {returned:?}");
        assert_eq!(transport.calls(), 1);
    }
}

#[tokio::test]
async fn stream_delivers_fixture_chunks_in_order() {
    let transport = FakeTransport::with_streams(vec![Ok(fixture_events())]);
    let mut stream = client(transport.clone(), 3).stream(request(true));

    let mut chunks = Vec::new();
    while let StreamItem::Chunk(chunk) = stream.pull().await.expect("pull") {
        chunks.push(chunk);
    }

    assert_eq!(
        chunks,
        vec![
            Chunk::content_delta("Hel"),
            Chunk::content_delta("lo"),
            Chunk::message_stop(),
        ]
    );
    let text: String = chunks
        .iter()
        .filter(|chunk| chunk.kind == ChunkKind::ContentDelta)
        .map(|chunk| chunk.text.as_str())
        .collect();
    assert_eq!(text, "Hello");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stream_reconnect_restarts_with_identical_request() {
    let transport = FakeTransport::with_streams(vec![
        Ok(vec![Ok(json!({"delta": {"text": "Hi th"}})), Err(transient())]),
        Ok(fixture_events()),
    ]);
    let mut stream = client(transport.clone(), 3).stream(request(true));

    let mut by_attempt: Vec<(u32, Chunk)> = Vec::new();
    loop {
        match stream.pull().await.expect("pull") {
            StreamItem::Chunk(chunk) => by_attempt.push((stream.attempt(), chunk)),
            StreamItem::End => break,
        }
    }

    let second: Vec<Chunk> = by_attempt
        .iter()
        .filter(|(attempt, _)| *attempt == 1)
        .map(|(_, chunk)| chunk.clone())
        .collect();
    assert_eq!(
        second,
        vec![
            Chunk::content_delta("Hel"),
            Chunk::content_delta("lo"),
            Chunk::message_stop(),
        ]
    );
    // The partial chunk was delivered once and never replayed.
    let partial = by_attempt
        .iter()
        .filter(|(_, chunk)| chunk.text == "Hi th")
        .count();
    assert_eq!(partial, 1);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
    assert_eq!(requests[0], request(true));
}

#[tokio::test(start_paused = true)]
async fn collect_text_keeps_only_the_finished_attempt() {
    let transport = FakeTransport::with_streams(vec![
        Ok(vec![Ok(json!({"delta": {"text": "Hi th"}})), Err(transient())]),
        Ok(fixture_events()),
    ]);

    let response = client(transport.clone(), 3)
        .stream(request(true))
        .collect_text()
        .await
        .expect("text");

    assert_eq!(response.text, "Hello");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn stream_permanent_error_on_first_pull_opens_once() {
    let transport = FakeTransport::with_streams(vec![Err(LLMError::Auth {
        message: "AccessDeniedException".to_string(),
    })]);
    let mut stream = client(transport.clone(), 3).stream(request(true));

    let err = stream.pull().await.expect_err("permanent");
    assert!(matches!(err, LLMError::Auth { .. }));
    assert_eq!(stream.pull().await.expect("end"), StreamItem::End);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stream_exhaustion_counts_retries_like_invoke() {
    let transport = FakeTransport::with_streams(Vec::new());
    let mut stream = client(transport.clone(), 3).stream(request(true));

    let err = stream.pull().await.expect_err("exhausted");
    assert!(matches!(err, LLMError::MaxRetriesExceeded { retries: 3, .. }));
    assert_eq!(transport.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn cancelling_during_backoff_stops_the_stream() {
    let transport = FakeTransport::with_streams(vec![Err(transient()), Ok(fixture_events())]);
    let client = client(transport.clone(), 3);
    let mut stream = client.stream(request(true));
    let token = client.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let err = stream.pull().await.expect_err("cancelled");
    assert!(matches!(err, LLMError::Cancelled { .. }));
    assert_eq!(stream.pull().await.expect("end"), StreamItem::End);
    assert_eq!(transport.calls(), 1);
}
