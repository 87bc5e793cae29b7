use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use serde_json::Value;

use crate::error::LLMError;
use crate::types::{CompleteResponse, GenerationRequest};

pub mod bedrock;

/// Raw provider events of one open stream; `None` marks natural end of stream.
pub type RawEventStream = Pin<Box<dyn Stream<Item = Result<Value, LLMError>> + Send>>;

/// Seam over a provider's network call.
///
/// Each method performs exactly one call and never retries. Failures must already be
/// classified: [`LLMError::Transient`] for temporary unavailability, a permanent
/// variant for everything else (see [`crate::error::classify_error`]).
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Issues one non-streaming call.
    async fn invoke(&self, request: &GenerationRequest) -> Result<CompleteResponse, LLMError>;

    /// Opens one response stream. Errors may surface here or from the returned stream.
    async fn open_stream(&self, request: &GenerationRequest) -> Result<RawEventStream, LLMError>;

    /// Provider name used in logs and error messages.
    fn name(&self) -> &'static str;
}

/// Thread-safe transport handle.
pub type DynModelTransport = Arc<dyn ModelTransport>;
