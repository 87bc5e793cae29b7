use crate::error::LLMError;
use crate::types::GenerationRequest;

use super::types::{BedrockMessage, BedrockRequestBody, BedrockTextBlock};

pub(crate) const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Translates a [`GenerationRequest`] into the Bedrock Anthropic body.
///
/// Messages with empty content are dropped, since Bedrock rejects empty text
/// blocks; the relative order of the rest is kept.
pub(crate) fn build_bedrock_body(request: &GenerationRequest) -> Result<BedrockRequestBody, LLMError> {
    let messages: Vec<BedrockMessage> = request
        .messages()
        .iter()
        .filter(|message| !message.content.is_empty())
        .map(|message| BedrockMessage {
            role: message.role.as_str(),
            content: vec![BedrockTextBlock {
                kind: "text".to_string(),
                text: Some(message.content.clone()),
            }],
        })
        .collect();

    if messages.is_empty() {
        return Err(LLMError::Validation {
            message: "every message has empty content".to_string(),
        });
    }

    Ok(BedrockRequestBody {
        anthropic_version: ANTHROPIC_VERSION,
        max_tokens: request.max_tokens(),
        temperature: request.temperature(),
        system: request.system().map(str::to_string),
        messages,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::Message;

    #[test]
    fn body_skips_empty_messages_and_keeps_order() {
        let request = GenerationRequest::builder("anthropic.claude-3-haiku-20240307-v1:0")
            .messages([
                Message::user("first"),
                Message::assistant(""),
                Message::user("second"),
            ])
            .system("be brief")
            .build()
            .expect("request");

        let body = serde_json::to_value(build_bedrock_body(&request).expect("body")).expect("json");
        assert_eq!(
            body,
            json!({
                "anthropic_version": "bedrock-2023-05-31",
                "max_tokens": 4096,
                "temperature": 0.7,
                "system": "be brief",
                "messages": [
                    {"role": "user", "content": [{"type": "text", "text": "first"}]},
                    {"role": "user", "content": [{"type": "text", "text": "second"}]}
                ]
            })
        );
    }

    #[test]
    fn body_omits_absent_system_prompt() {
        let request = GenerationRequest::builder("model")
            .message(Message::user("hi"))
            .build()
            .expect("request");
        let body = serde_json::to_value(build_bedrock_body(&request).expect("body")).expect("json");
        assert!(body.get("system").is_none());
    }

    #[test]
    fn only_empty_messages_is_a_validation_error() {
        let request = GenerationRequest::builder("model")
            .message(Message::user(""))
            .build()
            .expect("request");
        assert!(matches!(
            build_bedrock_body(&request),
            Err(LLMError::Validation { .. })
        ));
    }
}
