//! Reconnecting stream over [`crate::provider::ModelTransport::open_stream`].
//!
//! A transient failure while opening or reading the stream discards the broken
//! handle, waits out the backoff delay, and opens a fresh stream with the identical
//! request. The provider regenerates its answer from scratch: chunks yielded before
//! the break are not retracted, and the new attempt may repeat or diverge from them.
//! [`RetryingStream::attempt`] changes whenever that happens, and
//! [`RetryingStream::collect_text`] drops text from broken attempts.

use std::pin::Pin;

use futures_core::Stream;
use futures_util::StreamExt;
use rand::RngCore;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::LLMError;
use crate::provider::{DynModelTransport, RawEventStream};
use crate::retry::{RetryObserver, RetryState};
use crate::types::{Chunk, CompleteResponse, GenerationRequest};

/// Result of one [`RetryingStream::pull`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Chunk(Chunk),
    /// The sequence is over; every later pull returns `End` again.
    End,
}

/// Boxed chunk stream returned by [`RetryingStream::into_stream`].
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, LLMError>> + Send>>;

enum State {
    /// Nothing open; the next pull opens a stream.
    NoStream,
    Streaming(RawEventStream),
    /// Waiting out a backoff delay before reopening.
    Retrying,
    Done,
}

/// Lazy, forward-only, single-consumer sequence of [`Chunk`]s for one request.
///
/// # Examples
///
/// ```no_run
/// # async fn demo(client: wilma_llm::LLMClient, request: wilma_llm::GenerationRequest)
/// # -> Result<(), wilma_llm::LLMError> {
/// use wilma_llm::StreamItem;
///
/// let mut stream = client.stream(request);
/// while let StreamItem::Chunk(chunk) = stream.pull().await? {
///     print!("{}", chunk.text);
/// }
/// # Ok(())
/// # }
/// ```
pub struct RetryingStream {
    transport: DynModelTransport,
    request: GenerationRequest,
    retry: RetryState,
    state: State,
}

impl RetryingStream {
    /// Creates a stream with its own cancellation token and an entropy-seeded jitter source.
    ///
    /// Nothing is opened until the first [`RetryingStream::pull`].
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidConfig`] when the retry timing is invalid.
    pub fn new(
        transport: DynModelTransport,
        request: GenerationRequest,
        config: RetryConfig,
    ) -> Result<Self, LLMError> {
        let backoff = config.backoff()?;
        let retry = RetryState::new(&config, backoff, CancellationToken::new(), transport.name());
        Ok(Self::from_parts(transport, request, retry))
    }

    pub(crate) fn from_parts(
        transport: DynModelTransport,
        request: GenerationRequest,
        retry: RetryState,
    ) -> Self {
        Self {
            transport,
            request,
            retry,
            state: State::NoStream,
        }
    }

    /// Replaces the jitter source, e.g. with a seeded `StdRng` in tests.
    pub fn with_rng<R: RngCore + Send + Sync + 'static>(mut self, rng: R) -> Self {
        self.retry.set_rng(Box::new(rng));
        self
    }

    pub fn on_retry(mut self, observer: RetryObserver) -> Self {
        self.retry.set_observer(Some(observer));
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.retry.set_cancellation_token(token);
        self
    }

    /// Token that cancels this stream only.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.retry.cancellation_token().clone()
    }

    /// Number of reconnects so far; `0` while the first stream is in use.
    pub fn attempt(&self) -> u32 {
        self.retry.attempt()
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Pulls the next chunk, opening or reopening the underlying stream as needed.
    ///
    /// A [`crate::ChunkKind::MessageStop`] chunk is returned once and ends the
    /// sequence, even if the provider would send more events.
    ///
    /// # Errors
    ///
    /// Permanent errors, [`LLMError::MaxRetriesExceeded`] and [`LLMError::Cancelled`]
    /// are returned once; the stream is finished afterwards.
    pub async fn pull(&mut self) -> Result<StreamItem, LLMError> {
        let result = self.advance().await;
        if result.is_err() {
            self.state = State::Done;
        }
        result
    }

    async fn advance(&mut self) -> Result<StreamItem, LLMError> {
        loop {
            if matches!(self.state, State::Done) {
                return Ok(StreamItem::End);
            }
            self.retry.check_cancelled("before the next chunk")?;

            match &mut self.state {
                // A pull dropped mid-wait leaves `Retrying`; the attempt was already counted.
                State::NoStream | State::Retrying => {
                    tracing::debug!(
                        provider = self.transport.name(),
                        model = self.request.model_id(),
                        attempt = self.retry.attempt(),
                        "opening stream"
                    );
                    let opened = self
                        .retry
                        .cancellable(
                            "while opening the stream",
                            self.transport.open_stream(&self.request),
                        )
                        .await?;
                    match opened {
                        Ok(stream) => self.state = State::Streaming(stream),
                        Err(err) => self.retry_after(err).await?,
                    }
                }
                State::Streaming(stream) => {
                    let next = self
                        .retry
                        .cancellable("while reading the stream", stream.next())
                        .await?;
                    match next {
                        Some(Ok(event)) => {
                            let chunk = Chunk::from_event(&event);
                            if chunk.is_message_stop() {
                                self.state = State::Done;
                            }
                            return Ok(StreamItem::Chunk(chunk));
                        }
                        Some(Err(err)) => self.retry_after(err).await?,
                        None => {
                            self.state = State::Done;
                            return Ok(StreamItem::End);
                        }
                    }
                }
                State::Done => return Ok(StreamItem::End),
            }
        }
    }

    async fn retry_after(&mut self, err: LLMError) -> Result<(), LLMError> {
        self.state = State::Retrying;
        self.retry.backoff_or_fail(err).await?;
        self.state = State::NoStream;
        Ok(())
    }

    /// Drains the stream into a [`CompleteResponse`].
    ///
    /// Text from an attempt that broke and was restarted is discarded, so the result
    /// only holds the output of the attempt that finished.
    pub async fn collect_text(mut self) -> Result<CompleteResponse, LLMError> {
        let mut text = String::new();
        let mut attempt = self.attempt();
        loop {
            let item = self.pull().await?;
            if self.attempt() != attempt {
                text.clear();
                attempt = self.attempt();
            }
            match item {
                StreamItem::Chunk(chunk) if chunk.is_content_delta() => text.push_str(&chunk.text),
                StreamItem::Chunk(_) => {}
                StreamItem::End => break,
            }
        }
        Ok(CompleteResponse::from_text(text))
    }

    /// Adapts the stream to [`futures_core::Stream`]; the first error ends it.
    pub fn into_stream(self) -> ChunkStream {
        Box::pin(futures_util::stream::unfold(self, |mut stream| async move {
            match stream.pull().await {
                Ok(StreamItem::Chunk(chunk)) => Some((Ok(chunk), stream)),
                Ok(StreamItem::End) => None,
                Err(err) => Some((Err(err), stream)),
            }
        }))
    }
}
