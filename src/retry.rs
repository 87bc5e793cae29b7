//! Per-invocation retry bookkeeping shared by [`crate::LLMClient::invoke`] and
//! [`crate::RetryingStream`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::RetryConfig;
use crate::error::LLMError;

/// Reported once per retry, before the backoff wait starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    /// 1-based number of the retry about to be made.
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    /// Message of the transient error that triggered the retry.
    pub error: String,
}

/// Caller-supplied retry observer, e.g. to print "retrying in 2.1s (attempt 1/3)".
pub type RetryObserver = Arc<dyn Fn(&RetryNotice) + Send + Sync>;

/// Retry state owned by exactly one invocation. `attempt` only ever grows.
pub(crate) struct RetryState {
    attempt: u32,
    max_attempts: u32,
    backoff: Backoff,
    rng: Box<dyn RngCore + Send + Sync>,
    observer: Option<RetryObserver>,
    cancel: CancellationToken,
    provider: &'static str,
}

impl RetryState {
    pub(crate) fn new(
        config: &RetryConfig,
        backoff: Backoff,
        cancel: CancellationToken,
        provider: &'static str,
    ) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            backoff,
            rng: Box::new(StdRng::from_entropy()),
            observer: None,
            cancel,
            provider,
        }
    }

    pub(crate) fn set_rng(&mut self, rng: Box<dyn RngCore + Send + Sync>) {
        self.rng = rng;
    }

    pub(crate) fn set_observer(&mut self, observer: Option<RetryObserver>) {
        self.observer = observer;
    }

    pub(crate) fn set_cancellation_token(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn check_cancelled(&self, during: &str) -> Result<(), LLMError> {
        if self.cancel.is_cancelled() {
            Err(LLMError::cancelled(format!("cancelled {during}")))
        } else {
            Ok(())
        }
    }

    /// Runs `future` unless the invocation is cancelled first.
    pub(crate) async fn cancellable<F: Future>(
        &self,
        during: &str,
        future: F,
    ) -> Result<F::Output, LLMError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LLMError::cancelled(format!("cancelled {during}"))),
            output = future => Ok(output),
        }
    }

    /// Handles a failed call.
    ///
    /// Returns `Ok(())` once the backoff wait has elapsed and the call should be
    /// repeated. Non-transient errors come back unchanged; an exhausted budget comes
    /// back as [`LLMError::MaxRetriesExceeded`].
    pub(crate) async fn backoff_or_fail(&mut self, err: LLMError) -> Result<(), LLMError> {
        if !err.is_transient() {
            return Err(err);
        }
        if self.attempt >= self.max_attempts {
            return Err(LLMError::MaxRetriesExceeded {
                retries: self.attempt,
                source: Box::new(err),
            });
        }

        let delay = self.backoff.delay(self.attempt, &mut *self.rng);
        self.attempt += 1;

        tracing::warn!(
            provider = self.provider,
            attempt = self.attempt,
            max_attempts = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "service unavailable, retrying"
        );
        if let Some(observer) = &self.observer {
            observer(&RetryNotice {
                attempt: self.attempt,
                max_attempts: self.max_attempts,
                delay,
                error: err.to_string(),
            });
        }

        self.cancellable("while waiting to retry", tokio::time::sleep(delay))
            .await
    }
}
