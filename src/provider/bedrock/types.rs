use serde::{Deserialize, Serialize};

/// Request body for Anthropic models hosted on Bedrock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct BedrockRequestBody {
    pub(crate) anthropic_version: &'static str,
    pub(crate) max_tokens: u32,
    pub(crate) temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system: Option<String>,
    pub(crate) messages: Vec<BedrockMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct BedrockMessage {
    pub(crate) role: &'static str,
    pub(crate) content: Vec<BedrockTextBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct BedrockTextBlock {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) text: Option<String>,
}

/// Non-streaming `invoke` response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BedrockResponse {
    #[serde(default)]
    pub(crate) content: Vec<BedrockTextBlock>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<BedrockUsage>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct BedrockUsage {
    #[serde(default)]
    pub(crate) input_tokens: Option<u64>,
    #[serde(default)]
    pub(crate) output_tokens: Option<u64>,
}

/// Payload of a `chunk` event: a base64 encoded Anthropic stream event.
#[derive(Debug, Deserialize)]
pub(crate) struct ChunkPayload {
    pub(crate) bytes: String,
}

/// JSON error body returned with non-2xx responses and `exception` frames.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct BedrockErrorBody {
    #[serde(default, alias = "Message")]
    pub(crate) message: Option<String>,
    #[serde(default, rename = "__type")]
    pub(crate) error_type: Option<String>,
}
