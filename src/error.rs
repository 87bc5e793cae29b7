use thiserror::Error;

/// Aggregates every failure mode exposed by the invocation client.
///
/// Errors are classified exactly once, at the transport boundary (see
/// [`classify_error`]). Everything above the adapter relies on
/// [`LLMError::is_transient`] and never inspects raw error text again.
#[derive(Debug, Error)]
pub enum LLMError {
    /// The service is temporarily unavailable; the identical request may succeed later.
    #[error("service temporarily unavailable: {message}")]
    Transient { message: String },
    /// Represents transport-layer or networking failures that are not retried.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Reports invalid, missing or unauthorized credentials.
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// Signals validation failures in the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Indicates that a requested model could not be resolved.
    #[error("model not found: {message}")]
    ModelNotFound {
        /// Model identifier extracted from the error payload when available.
        model: Option<String>,
        /// Full error message returned by the provider for debugging.
        message: String,
    },
    /// Wraps provider-defined errors that match no other classification.
    #[error("provider {provider} error: {message}")]
    Provider {
        /// Name of the provider, such as `bedrock`.
        provider: &'static str,
        /// Human-readable error message returned by the provider.
        message: String,
    },
    /// The retry budget was exhausted while the service stayed unavailable.
    #[error("maximum retries ({retries}) exceeded; last error: {source}")]
    MaxRetriesExceeded {
        /// Number of retries actually made (calls made is `retries + 1`).
        retries: u32,
        /// Last transient error observed.
        source: Box<LLMError>,
    },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// Surfaces cancellations triggered explicitly by the caller.
    #[error("request cancelled: {message}")]
    Cancelled {
        /// Where the cancellation was observed.
        message: String,
    },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use wilma_llm::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// assert!(err.is_permanent());
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Provider`] with the given provider name and message.
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Cancelled`].
    pub fn cancelled<T: Into<String>>(message: T) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Returns `true` only for errors that are eligible for retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns `true` for errors that will not resolve by re-sending the identical request.
    ///
    /// Retry exhaustion, cancellation and configuration errors are neither transient
    /// nor permanent: they describe the invocation, not the remote call.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Auth { .. }
                | Self::Validation { .. }
                | Self::ModelNotFound { .. }
                | Self::Provider { .. }
        )
    }
}

const TRANSIENT_SIGNATURE: &str = "serviceunavailableexception";

/// Classifies a raw provider error message into an [`LLMError`].
///
/// Only messages containing `ServiceUnavailableException` (any case) are
/// transient. Everything else is permanent; the remaining checks merely pick the
/// most descriptive permanent variant.
///
/// # Examples
///
/// ```
/// use wilma_llm::error::classify_error;
///
/// assert!(classify_error("bedrock", "ServiceUnavailableException: try later").is_transient());
/// assert!(classify_error("bedrock", "AccessDeniedException: nope").is_permanent());
/// ```
pub fn classify_error(provider: &'static str, message: &str) -> LLMError {
    let lower = message.to_ascii_lowercase();
    let message = message.to_string();

    if lower.contains(TRANSIENT_SIGNATURE) {
        return LLMError::Transient { message };
    }

    const AUTH_HINTS: [&str; 5] = [
        "accessdeniedexception",
        "unrecognizedclientexception",
        "expiredtokenexception",
        "not authorized",
        "access denied",
    ];
    if AUTH_HINTS.iter().any(|needle| lower.contains(needle)) {
        return LLMError::Auth { message };
    }

    const NOT_FOUND_HINTS: [&str; 4] = [
        "resourcenotfoundexception",
        "model not found",
        "unknown model",
        "model identifier is invalid",
    ];
    if NOT_FOUND_HINTS.iter().any(|needle| lower.contains(needle)) {
        return LLMError::ModelNotFound {
            model: extract_model_identifier(&message),
            message,
        };
    }

    const VALIDATION_HINTS: [&str; 4] = [
        "validationexception",
        "malformed",
        "serializationexception",
        "invalid request",
    ];
    if VALIDATION_HINTS.iter().any(|needle| lower.contains(needle)) {
        return LLMError::Validation { message };
    }

    LLMError::Provider { provider, message }
}

/// Attempts to extract a model identifier from an error payload.
pub(crate) fn extract_model_identifier(message: &str) -> Option<String> {
    for delimiter in ['`', '"', '\''] {
        if let Some(value) = between_delimiters(message, delimiter) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn between_delimiters(message: &str, delimiter: char) -> Option<String> {
    let start = message.find(delimiter)? + delimiter.len_utf8();
    let rest = message.get(start..)?;
    let end = rest.find(delimiter)?;
    Some(rest[..end].to_string())
}
