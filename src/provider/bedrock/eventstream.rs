//! Incremental decoder for the `application/vnd.amazon.eventstream` framing.
//!
//! Every message is laid out as
//!
//! ```text
//! [total_len: u32][headers_len: u32][prelude_crc: u32][headers][payload][message_crc: u32]
//! ```
//!
//! with big-endian integers and CRC-32 (IEEE) checksums.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::error::LLMError;
use crate::http::HttpBodyStream;

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_MESSAGE_LEN: usize = PRELUDE_LEN + CRC_LEN;
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Typed header value carried by an event-stream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Bytes(Vec<u8>),
    String(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(value) => Some(value),
            _ => None,
        }
    }

    fn type_code(&self) -> u8 {
        match self {
            HeaderValue::Bool(true) => 0,
            HeaderValue::Bool(false) => 1,
            HeaderValue::Byte(_) => 2,
            HeaderValue::Int16(_) => 3,
            HeaderValue::Int32(_) => 4,
            HeaderValue::Int64(_) => 5,
            HeaderValue::Bytes(_) => 6,
            HeaderValue::String(_) => 7,
            HeaderValue::Timestamp(_) => 8,
            HeaderValue::Uuid(_) => 9,
        }
    }
}

/// One decoded event-stream message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStreamMessage {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Vec<u8>,
}

impl EventStreamMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: Vec::new(),
            payload: payload.into(),
        }
    }

    /// Appends a string header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.into(), HeaderValue::String(value.into())));
        self
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Value of a string header, e.g. `:message-type`.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(HeaderValue::as_str)
    }

    /// Serializes the message into one complete frame, checksums included.
    ///
    /// # Examples
    ///
    /// ```
    /// use wilma_llm::provider::bedrock::EventStreamMessage;
    ///
    /// let message = EventStreamMessage::new(b"{}".to_vec()).with_header(":event-type", "chunk");
    /// let frame = message.encode();
    /// assert_eq!(EventStreamMessage::decode(&frame).unwrap(), message);
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut headers = Vec::new();
        for (name, value) in &self.headers {
            headers.push(name.len() as u8);
            headers.extend_from_slice(name.as_bytes());
            headers.push(value.type_code());
            match value {
                HeaderValue::Bool(_) => {}
                HeaderValue::Byte(v) => headers.push(*v as u8),
                HeaderValue::Int16(v) => headers.extend_from_slice(&v.to_be_bytes()),
                HeaderValue::Int32(v) => headers.extend_from_slice(&v.to_be_bytes()),
                HeaderValue::Int64(v) | HeaderValue::Timestamp(v) => {
                    headers.extend_from_slice(&v.to_be_bytes())
                }
                HeaderValue::Bytes(v) => {
                    headers.extend_from_slice(&(v.len() as u16).to_be_bytes());
                    headers.extend_from_slice(v);
                }
                HeaderValue::String(v) => {
                    headers.extend_from_slice(&(v.len() as u16).to_be_bytes());
                    headers.extend_from_slice(v.as_bytes());
                }
                HeaderValue::Uuid(v) => headers.extend_from_slice(v),
            }
        }

        let total_len = MIN_MESSAGE_LEN + headers.len() + self.payload.len();
        let mut frame = Vec::with_capacity(total_len);
        frame.extend_from_slice(&(total_len as u32).to_be_bytes());
        frame.extend_from_slice(&(headers.len() as u32).to_be_bytes());
        let prelude_crc = crc32(&frame);
        frame.extend_from_slice(&prelude_crc.to_be_bytes());
        frame.extend_from_slice(&headers);
        frame.extend_from_slice(&self.payload);
        let message_crc = crc32(&frame);
        frame.extend_from_slice(&message_crc.to_be_bytes());
        frame
    }

    /// Parses exactly one complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Transport`] when lengths or checksums do not add up.
    pub fn decode(frame: &[u8]) -> Result<Self, LLMError> {
        if frame.len() < MIN_MESSAGE_LEN {
            return Err(malformed(format!("frame of {} bytes is too short", frame.len())));
        }
        let total_len = read_u32(&frame[0..4]) as usize;
        let headers_len = read_u32(&frame[4..8]) as usize;
        if total_len != frame.len() {
            return Err(malformed(format!(
                "declared length {total_len} does not match frame length {}",
                frame.len()
            )));
        }
        if headers_len > total_len - MIN_MESSAGE_LEN {
            return Err(malformed(format!("headers length {headers_len} overflows frame")));
        }

        let prelude_crc = read_u32(&frame[8..12]);
        if crc32(&frame[..8]) != prelude_crc {
            return Err(malformed("prelude checksum mismatch"));
        }
        let message_crc = read_u32(&frame[total_len - CRC_LEN..]);
        if crc32(&frame[..total_len - CRC_LEN]) != message_crc {
            return Err(malformed("message checksum mismatch"));
        }

        let headers_end = PRELUDE_LEN + headers_len;
        let headers = decode_headers(&frame[PRELUDE_LEN..headers_end])?;
        let payload = frame[headers_end..total_len - CRC_LEN].to_vec();
        Ok(Self { headers, payload })
    }
}

fn decode_headers(mut bytes: &[u8]) -> Result<Vec<(String, HeaderValue)>, LLMError> {
    let mut headers = Vec::new();
    while !bytes.is_empty() {
        let name_len = take(&mut bytes, 1)?[0] as usize;
        let name = String::from_utf8(take(&mut bytes, name_len)?.to_vec())
            .map_err(|err| malformed(format!("header name is not UTF-8: {err}")))?;
        let type_code = take(&mut bytes, 1)?[0];
        let value = match type_code {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(take(&mut bytes, 1)?[0] as i8),
            3 => HeaderValue::Int16(i16::from_be_bytes(take_array(&mut bytes)?)),
            4 => HeaderValue::Int32(i32::from_be_bytes(take_array(&mut bytes)?)),
            5 => HeaderValue::Int64(i64::from_be_bytes(take_array(&mut bytes)?)),
            6 => {
                let len = u16::from_be_bytes(take_array(&mut bytes)?) as usize;
                HeaderValue::Bytes(take(&mut bytes, len)?.to_vec())
            }
            7 => {
                let len = u16::from_be_bytes(take_array(&mut bytes)?) as usize;
                let value = String::from_utf8(take(&mut bytes, len)?.to_vec()).map_err(|err| {
                    malformed(format!("header {name} is not UTF-8: {err}"))
                })?;
                HeaderValue::String(value)
            }
            8 => HeaderValue::Timestamp(i64::from_be_bytes(take_array(&mut bytes)?)),
            9 => HeaderValue::Uuid(take_array(&mut bytes)?),
            other => return Err(malformed(format!("unknown header type {other} for {name}"))),
        };
        headers.push((name, value));
    }
    Ok(headers)
}

fn take<'a>(bytes: &mut &'a [u8], len: usize) -> Result<&'a [u8], LLMError> {
    if bytes.len() < len {
        return Err(malformed("header block truncated"));
    }
    let (head, tail) = bytes.split_at(len);
    *bytes = tail;
    Ok(head)
}

fn take_array<const N: usize>(bytes: &mut &[u8]) -> Result<[u8; N], LLMError> {
    let mut array = [0u8; N];
    array.copy_from_slice(take(bytes, N)?);
    Ok(array)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut array = [0u8; 4];
    array.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(array)
}

fn malformed(reason: impl Into<String>) -> LLMError {
    LLMError::transport(format!("malformed event-stream frame: {}", reason.into()))
}

/// CRC-32 with the IEEE polynomial, as used by the framing.
fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for byte in bytes {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// Splits a raw HTTP body into [`EventStreamMessage`]s as bytes arrive.
///
/// Frames may straddle body chunks. After the first error the decoder is exhausted.
pub struct EventStreamDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    stream_closed: bool,
    failed: bool,
}

impl EventStreamDecoder {
    pub fn new(body: HttpBodyStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            stream_closed: false,
            failed: false,
        }
    }

    fn next_frame(&mut self) -> Option<Result<EventStreamMessage, LLMError>> {
        if self.buffer.len() < 4 {
            return None;
        }
        let total_len = read_u32(&self.buffer[0..4]) as usize;
        if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&total_len) {
            return Some(Err(malformed(format!("invalid message length {total_len}"))));
        }
        if self.buffer.len() < total_len {
            return None;
        }
        let frame: Vec<u8> = self.buffer.drain(..total_len).collect();
        Some(EventStreamMessage::decode(&frame))
    }

    fn fail(&mut self, err: LLMError) -> Poll<Option<Result<EventStreamMessage, LLMError>>> {
        self.failed = true;
        self.buffer.clear();
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for EventStreamDecoder {
    type Item = Result<EventStreamMessage, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.failed {
            return Poll::Ready(None);
        }

        loop {
            match this.next_frame() {
                Some(Ok(message)) => return Poll::Ready(Some(Ok(message))),
                Some(Err(err)) => return this.fail(err),
                None => {}
            }

            if this.stream_closed {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let leftover = this.buffer.len();
                return this.fail(malformed(format!(
                    "body ended inside a frame ({leftover} bytes left)"
                )));
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(err))) => return this.fail(err),
                Poll::Ready(None) => this.stream_closed = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
