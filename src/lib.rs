//! Resilient client for Bedrock-hosted LLMs: one request/response call or a reconnecting
//! token stream, with bounded exponential-backoff retry on service unavailability.

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod retry;
pub mod stream;
pub mod types;

pub use client::{LLMClient, LLMClientBuilder, MessageOutput};
pub use config::{ClientConfig, Credential, RetryConfig, build_client_from_config};
pub use error::LLMError;
pub use provider::{DynModelTransport, ModelTransport, RawEventStream};
pub use retry::{RetryNotice, RetryObserver};
pub use stream::{ChunkStream, RetryingStream, StreamItem};
pub use types::*;
