//! Shared data structures modeling generation requests and responses.
//!
//! These types are provider-agnostic: adapters in [`crate::provider`] translate them
//! into their own wire formats, and translate wire events back into [`Chunk`]s.

use serde::{Deserialize, Serialize};

use crate::error::LLMError;

mod chunk;

pub use chunk::{Chunk, ChunkKind};

/// Default completion budget applied when the caller does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Default sampling temperature applied when the caller does not set one.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of the conversation.
///
/// # Examples
///
/// ```
/// use wilma_llm::types::{Message, Role};
///
/// let msg = Message::user("Hello there");
/// assert_eq!(msg.role, Role::User);
/// assert_eq!(msg.content, "Hello there");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A single, immutable request for model output.
///
/// Built through [`GenerationRequest::builder`]; once built the request cannot be
/// modified, so a retry always re-sends exactly what the first attempt sent.
///
/// # Examples
///
/// ```
/// use wilma_llm::types::{GenerationRequest, Message};
///
/// let request = GenerationRequest::builder("anthropic.claude-3-haiku-20240307-v1:0")
///     .message(Message::user("Summarise the Rust borrow checker in one line."))
///     .system("Answer in British English.")
///     .max_tokens(256)
///     .temperature(0.5)
///     .build()
///     .unwrap();
/// assert_eq!(request.messages().len(), 1);
/// assert_eq!(request.max_tokens(), 256);
/// assert!(!request.stream());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    model_id: String,
    messages: Vec<Message>,
    system: Option<String>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

impl GenerationRequest {
    /// Starts a builder for the given model identifier.
    pub fn builder(model_id: impl Into<String>) -> GenerationRequestBuilder {
        GenerationRequestBuilder {
            model_id: model_id.into(),
            messages: Vec::new(),
            system: None,
            max_tokens: None,
            temperature: None,
            stream: false,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Conversation turns in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Whether the caller asked for incremental delivery.
    pub fn stream(&self) -> bool {
        self.stream
    }
}

/// Builder for [`GenerationRequest`].
#[derive(Debug, Clone)]
pub struct GenerationRequestBuilder {
    model_id: String,
    messages: Vec<Message>,
    system: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    stream: bool,
}

impl GenerationRequestBuilder {
    /// Appends one message, keeping insertion order.
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Appends several messages, keeping insertion order.
    pub fn messages<I: IntoIterator<Item = Message>>(mut self, messages: I) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Validates and freezes the request.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Validation`] when the model id is blank, no message is
    /// present, `max_tokens` is zero, or `temperature` lies outside `[0, 1]`.
    pub fn build(self) -> Result<GenerationRequest, LLMError> {
        if self.model_id.trim().is_empty() {
            return Err(LLMError::Validation {
                message: "model_id must not be empty".to_string(),
            });
        }
        if self.messages.is_empty() {
            return Err(LLMError::Validation {
                message: "a generation request requires at least one message".to_string(),
            });
        }

        let max_tokens = self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        if max_tokens == 0 {
            return Err(LLMError::Validation {
                message: "max_tokens must be positive".to_string(),
            });
        }

        let temperature = self.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=1.0).contains(&temperature) {
            return Err(LLMError::Validation {
                message: format!("temperature must lie in [0, 1], got {temperature}"),
            });
        }

        Ok(GenerationRequest {
            model_id: self.model_id,
            messages: self.messages,
            system: self.system,
            max_tokens,
            temperature,
            stream: self.stream,
        })
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Fully buffered model output; the non-streaming equivalent of a drained stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub text: String,
    /// Provider stop reason, e.g. `end_turn` or `max_tokens`.
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl CompleteResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}
