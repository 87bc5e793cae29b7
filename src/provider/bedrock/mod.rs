//! Amazon Bedrock Runtime adapter for Anthropic models.

mod error;
mod eventstream;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use eventstream::{EventStreamDecoder, EventStreamMessage, HeaderValue};
pub use provider::BedrockProvider;
