use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::RetryConfig;
use crate::error::LLMError;
use crate::provider::DynModelTransport;
use crate::retry::{RetryObserver, RetryState};
use crate::stream::RetryingStream;
use crate::types::{CompleteResponse, GenerationRequest};

/// Output of [`LLMClient::create_message`], chosen by [`GenerationRequest::stream`].
pub enum MessageOutput {
    Complete(CompleteResponse),
    Stream(RetryingStream),
}

/// Invocation entry point; retries transient failures of one [`ModelTransport`].
///
/// Cloning is cheap and clones share the transport and the cancellation token. Every
/// invocation carries its own retry state.
///
/// [`ModelTransport`]: crate::provider::ModelTransport
#[derive(Clone)]
pub struct LLMClient {
    transport: DynModelTransport,
    retry: RetryConfig,
    backoff: Backoff,
    cancel: CancellationToken,
    observer: Option<RetryObserver>,
    rng_seed: Option<u64>,
}

impl LLMClient {
    /// Starts a builder around the given transport.
    pub fn builder(transport: DynModelTransport) -> LLMClientBuilder {
        LLMClientBuilder {
            transport,
            retry: RetryConfig::default(),
            cancel: None,
            observer: None,
            rng_seed: None,
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Cancelling this token aborts every running and future invocation of the client.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    fn retry_state(&self) -> RetryState {
        let mut state = RetryState::new(
            &self.retry,
            self.backoff,
            self.cancel.child_token(),
            self.transport.name(),
        );
        state.set_observer(self.observer.clone());
        if let Some(seed) = self.rng_seed {
            state.set_rng(Box::new(StdRng::seed_from_u64(seed)));
        }
        state
    }

    /// Sends a non-streaming request, retrying only transient failures.
    ///
    /// # Errors
    ///
    /// Permanent errors are returned as soon as they occur. When every retry fails
    /// transiently the result is [`LLMError::MaxRetriesExceeded`] wrapping the last
    /// error; cancellation yields [`LLMError::Cancelled`].
    pub async fn invoke(&self, request: &GenerationRequest) -> Result<CompleteResponse, LLMError> {
        let mut retry = self.retry_state();
        loop {
            retry.check_cancelled("before invoking the model")?;
            tracing::debug!(
                provider = self.transport.name(),
                model = request.model_id(),
                attempt = retry.attempt(),
                "invoking model"
            );
            let result = retry
                .cancellable("while waiting for a response", self.transport.invoke(request))
                .await?;
            match result {
                Ok(response) => return Ok(response),
                Err(err) => retry.backoff_or_fail(err).await?,
            }
        }
    }

    /// Creates a lazily opened, reconnecting stream for `request`.
    pub fn stream(&self, request: GenerationRequest) -> RetryingStream {
        RetryingStream::from_parts(self.transport.clone(), request, self.retry_state())
    }

    /// Dispatches on [`GenerationRequest::stream`]: a buffered response or a stream.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # async fn demo(client: wilma_llm::LLMClient) -> Result<(), wilma_llm::LLMError> {
    /// use wilma_llm::{GenerationRequest, Message, MessageOutput};
    ///
    /// let request = GenerationRequest::builder("anthropic.claude-3-haiku-20240307-v1:0")
    ///     .message(Message::user("Hello"))
    ///     .stream(true)
    ///     .build()?;
    /// match client.create_message(request).await? {
    ///     MessageOutput::Complete(response) => println!("{}", response.text),
    ///     MessageOutput::Stream(stream) => println!("{}", stream.collect_text().await?.text),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_message(&self, request: GenerationRequest) -> Result<MessageOutput, LLMError> {
        if request.stream() {
            Ok(MessageOutput::Stream(self.stream(request)))
        } else {
            self.invoke(&request).await.map(MessageOutput::Complete)
        }
    }
}

/// Collects client settings before validation.
pub struct LLMClientBuilder {
    transport: DynModelTransport,
    retry: RetryConfig,
    cancel: Option<CancellationToken>,
    observer: Option<RetryObserver>,
    rng_seed: Option<u64>,
}

impl LLMClientBuilder {
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    /// Uses an existing token (e.g. a process-wide shutdown token) as the parent of
    /// every invocation's token.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Registers a callback invoked before each backoff wait.
    pub fn on_retry(mut self, observer: RetryObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Seeds the jitter source of every invocation, making delays reproducible.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Validates the retry timing and builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidConfig`] if `base_delay` is zero or
    /// `max_delay < base_delay`.
    pub fn build(self) -> Result<LLMClient, LLMError> {
        let backoff = self.retry.backoff()?;
        Ok(LLMClient {
            transport: self.transport,
            retry: self.retry,
            backoff,
            cancel: self.cancel.unwrap_or_else(CancellationToken::new),
            observer: self.observer,
            rng_seed: self.rng_seed,
        })
    }
}
