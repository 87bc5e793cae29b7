use std::pin::Pin;
use std::task::{Context, Poll};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::Value;

use crate::error::{LLMError, classify_error};
use crate::http::HttpBodyStream;
use crate::provider::RawEventStream;

use super::error::parse_exception_frame;
use super::eventstream::{EventStreamDecoder, EventStreamMessage};
use super::types::ChunkPayload;

pub(crate) fn create_stream(body: HttpBodyStream, provider: &'static str) -> RawEventStream {
    Box::pin(BedrockEventStream::new(body, provider))
}

/// Drains a failed streaming response so its error body can be parsed.
pub(crate) async fn collect_stream_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| LLMError::Provider {
        provider,
        message: format!("failed to decode stream error body: {err}"),
    })
}

/// Turns event-stream messages into raw Anthropic events.
///
/// `chunk` events yield their decoded JSON; `exception` and `error` frames yield one
/// classified error and end the stream; other events are skipped.
struct BedrockEventStream {
    decoder: EventStreamDecoder,
    provider: &'static str,
    finished: bool,
}

impl BedrockEventStream {
    fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            decoder: EventStreamDecoder::new(body),
            provider,
            finished: false,
        }
    }

    fn convert(&self, message: EventStreamMessage) -> Option<Result<Value, LLMError>> {
        match message.header_str(":message-type").unwrap_or("event") {
            "event" => {
                if message.header_str(":event-type") != Some("chunk") {
                    return None;
                }
                Some(self.decode_chunk(&message.payload))
            }
            "exception" => Some(Err(parse_exception_frame(
                self.provider,
                message.header_str(":exception-type"),
                &message.payload,
            ))),
            "error" => {
                let code = message.header_str(":error-code").unwrap_or("UnknownError");
                let text = message.header_str(":error-message").unwrap_or_default();
                Some(Err(classify_error(self.provider, &format!("{code}: {text}"))))
            }
            other => Some(Err(LLMError::provider(
                self.provider,
                format!("unexpected event-stream message type {other}"),
            ))),
        }
    }

    fn decode_chunk(&self, payload: &[u8]) -> Result<Value, LLMError> {
        let chunk: ChunkPayload = serde_json::from_slice(payload).map_err(|err| {
            LLMError::provider(self.provider, format!("failed to parse chunk payload: {err}"))
        })?;
        let bytes = STANDARD.decode(chunk.bytes.as_bytes()).map_err(|err| {
            LLMError::provider(self.provider, format!("chunk bytes are not base64: {err}"))
        })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            LLMError::provider(self.provider, format!("failed to parse stream event: {err}"))
        })
    }
}

impl Stream for BedrockEventStream {
    type Item = Result<Value, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.decoder).poll_next(cx) {
                Poll::Ready(Some(Ok(message))) => match this.convert(message) {
                    Some(Ok(value)) => return Poll::Ready(Some(Ok(value))),
                    Some(Err(err)) => {
                        this.finished = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                    None => continue,
                },
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
