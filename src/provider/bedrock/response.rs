use crate::types::{CompleteResponse, TokenUsage};

use super::types::BedrockResponse;

/// Maps an `invoke` response body; the text comes from the first content block.
pub(crate) fn map_response(resp: BedrockResponse) -> CompleteResponse {
    let text = resp
        .content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .unwrap_or_default();

    CompleteResponse {
        text,
        stop_reason: resp.stop_reason,
        usage: resp.usage.map(|usage| TokenUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }),
    }
}
