use serde::{Deserialize, Serialize};
use serde_json::Value;

const CONTENT_DELTA: &str = "content_block_delta";
const MESSAGE_STOP: &str = "message_stop";

/// Normalized category of a streamed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkKind {
    /// Carries a fragment of output text to append to the response.
    ContentDelta,
    /// Normal end of generation; consumers stop here.
    MessageStop,
    /// Any other explicitly tagged event, keeping the provider's tag.
    Other(String),
}

/// One normalized unit of model output.
///
/// Concatenating the `text` of every [`ChunkKind::ContentDelta`] chunk of one
/// successful attempt, in delivery order, yields the full response text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub text: String,
}

impl Chunk {
    pub fn content_delta(text: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::ContentDelta,
            text: text.into(),
        }
    }

    pub fn message_stop() -> Self {
        Self {
            kind: ChunkKind::MessageStop,
            text: String::new(),
        }
    }

    pub fn is_content_delta(&self) -> bool {
        self.kind == ChunkKind::ContentDelta
    }

    pub fn is_message_stop(&self) -> bool {
        self.kind == ChunkKind::MessageStop
    }

    /// Normalizes a raw provider event into a [`Chunk`].
    ///
    /// Events may be true deltas (`{"delta": {"text": ..}}`) or restate a full
    /// content list (`{"content": [{"text": ..}]}`); both are legal and are treated
    /// alike. Missing or mistyped fields degrade to defaults, never to errors.
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::json;
    /// use wilma_llm::types::{Chunk, ChunkKind};
    ///
    /// let chunk = Chunk::from_event(&json!({"delta": {"text": "Hel"}}));
    /// assert_eq!(chunk, Chunk::content_delta("Hel"));
    ///
    /// let stop = Chunk::from_event(&json!({"type": "message_stop"}));
    /// assert_eq!(stop.kind, ChunkKind::MessageStop);
    /// ```
    pub fn from_event(event: &Value) -> Self {
        let wire = WireEvent::parse(event);
        Self {
            kind: wire.kind(),
            text: wire.text().into_text(),
        }
    }
}

/// Loose view of a provider event; every field is optional.
#[derive(Debug, Default)]
struct WireEvent {
    kind: Option<String>,
    delta: Option<WireText>,
    content: Option<Vec<WireText>>,
}

#[derive(Debug, Default, Deserialize)]
struct WireText {
    #[serde(default)]
    text: Option<String>,
}

/// Where an event's text came from, in fallback order.
enum TextSource {
    Delta(String),
    Content(String),
    Empty,
}

impl TextSource {
    fn into_text(self) -> String {
        match self {
            TextSource::Delta(text) | TextSource::Content(text) => text,
            TextSource::Empty => String::new(),
        }
    }
}

impl WireEvent {
    fn parse(event: &Value) -> Self {
        // Field-by-field so that one malformed field does not discard the rest.
        let kind = event
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);
        let delta = event
            .get("delta")
            .map(|value| serde_json::from_value(value.clone()).unwrap_or_default());
        let content = event
            .get("content")
            .and_then(|value| serde_json::from_value(value.clone()).ok());
        Self {
            kind,
            delta,
            content,
        }
    }

    fn kind(&self) -> ChunkKind {
        match self.kind.as_deref() {
            None | Some(CONTENT_DELTA) => ChunkKind::ContentDelta,
            Some(MESSAGE_STOP) => ChunkKind::MessageStop,
            Some(other) => ChunkKind::Other(other.to_string()),
        }
    }

    fn text(&self) -> TextSource {
        if let Some(delta) = &self.delta {
            return delta
                .text
                .clone()
                .map_or(TextSource::Empty, TextSource::Delta);
        }
        self.content
            .as_ref()
            .and_then(|blocks| blocks.first())
            .and_then(|block| block.text.clone())
            .map_or(TextSource::Empty, TextSource::Content)
    }
}
