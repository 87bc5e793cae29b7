use std::collections::HashMap;

use crate::error::{LLMError, classify_error};
use crate::http::header_value;

use super::types::BedrockErrorBody;

const ERROR_TYPE_HEADER: &str = "x-amzn-ErrorType";

/// Parses a non-2xx Bedrock response into a classified [`LLMError`].
///
/// The error type comes from the `x-amzn-ErrorType` header (`Type:uri` form) or the
/// body's `__type` (`namespace#Type` form); the message from `message`/`Message`.
pub(crate) fn parse_bedrock_error(
    provider: &'static str,
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> LLMError {
    let parsed = serde_json::from_str::<BedrockErrorBody>(body).unwrap_or_default();

    let error_type = header_value(headers, ERROR_TYPE_HEADER)
        .map(|value| value.split(':').next().unwrap_or(value).trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            parsed
                .error_type
                .as_deref()
                .map(|value| value.rsplit('#').next().unwrap_or(value).to_string())
        });

    let message = parsed.message.unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("status {status}")
        } else {
            body.trim().to_string()
        }
    });

    match error_type {
        Some(error_type) => classify_error(provider, &format!("{error_type}: {message}")),
        None => classify_error(provider, &format!("status {status}: {message}")),
    }
}

/// Classifies an in-stream `exception` frame.
pub(crate) fn parse_exception_frame(
    provider: &'static str,
    exception_type: Option<&str>,
    payload: &[u8],
) -> LLMError {
    let parsed = serde_json::from_slice::<BedrockErrorBody>(payload).unwrap_or_default();
    let message = parsed
        .message
        .unwrap_or_else(|| String::from_utf8_lossy(payload).into_owned());
    let exception_type = exception_type.unwrap_or("UnknownException");
    classify_error(provider, &format!("{exception_type}: {message}"))
}
