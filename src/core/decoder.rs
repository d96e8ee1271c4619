//! Event-stream framing and payload parsing.
//!
//! [`ChunkDecoder`] turns transport chunks into complete `\n\n`-separated
//! events. It decodes UTF-8 incrementally, so a character split across two
//! chunks comes out whole. [`parse_event`] interprets a single event.

use std::error::Error;
use std::fmt;

use memchr::memmem;

use crate::api::ChatResponse;

pub const EVENT_SEPARATOR: &str = "\n\n";
pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Default)]
pub struct ChunkDecoder {
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    /// Decoded text not yet terminated by a separator.
    buffer: String,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `chunk` and returns every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode(chunk);
        self.drain_events()
    }

    /// Flushes the decoder at end of stream. A non-blank trailing fragment
    /// is returned as a final event even though it was never terminated.
    pub fn finish(&mut self) -> Vec<String> {
        if !self.pending.is_empty() {
            self.pending.clear();
            self.buffer.push(char::REPLACEMENT_CHARACTER);
        }

        let mut events = self.drain_events();
        let rest = std::mem::take(&mut self.buffer);
        if !rest.trim().is_empty() {
            events.push(rest);
        }
        events
    }

    pub fn has_buffered_data(&self) -> bool {
        !self.pending.is_empty() || !self.buffer.trim().is_empty()
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    start = self.pending.len();
                }
                Err(err) => {
                    let valid_end = start + err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending[start..valid_end]) {
                        self.buffer.push_str(text);
                    }
                    match err.error_len() {
                        Some(invalid_len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + invalid_len;
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
    }

    fn drain_events(&mut self) -> Vec<String> {
        let finder = memmem::Finder::new(EVENT_SEPARATOR);
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(offset) = finder.find(&self.buffer.as_bytes()[start..]) {
            events.push(self.buffer[start..start + offset].to_string());
            start += offset + EVENT_SEPARATOR.len();
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        events
    }
}

/// Result of interpreting one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    /// A non-empty text fragment.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Valid frame without content.
    Empty,
    /// Not a `data:` event.
    Ignored,
}

#[derive(Debug)]
pub enum EventParseCause {
    Json(serde_json::Error),
    MissingChoice,
}

impl fmt::Display for EventParseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventParseCause::Json(err) => write!(f, "{err}"),
            EventParseCause::MissingChoice => f.write_str("response has no choices"),
        }
    }
}

/// A malformed frame. Recoverable: the stream continues with the next event.
#[derive(Debug)]
pub struct EventParseError {
    pub payload: String,
    pub cause: EventParseCause,
}

impl fmt::Display for EventParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to parse stream event ({}): {}",
            self.cause, self.payload
        )
    }
}

impl Error for EventParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            EventParseCause::Json(err) => Some(err),
            EventParseCause::MissingChoice => None,
        }
    }
}

pub fn data_payload(event: &str) -> Option<&str> {
    event.trim().strip_prefix(DATA_PREFIX).map(str::trim)
}

pub fn parse_event(event: &str) -> Result<ParsedEvent, EventParseError> {
    let Some(payload) = data_payload(event) else {
        return Ok(ParsedEvent::Ignored);
    };

    if payload == DONE_SENTINEL {
        return Ok(ParsedEvent::Done);
    }

    let response =
        serde_json::from_str::<ChatResponse>(payload).map_err(|err| EventParseError {
            payload: payload.to_string(),
            cause: EventParseCause::Json(err),
        })?;

    let choice = response.choices.first().ok_or_else(|| EventParseError {
        payload: payload.to_string(),
        cause: EventParseCause::MissingChoice,
    })?;

    match &choice.delta.content {
        Some(content) if !content.is_empty() => Ok(ParsedEvent::Delta(content.clone())),
        _ => Ok(ParsedEvent::Empty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn sample_stream() -> String {
        let mut body = String::new();
        for part in ["Grüße ", "aus ", "Köln 🌍", "\nzweite Zeile"] {
            body.push_str(&frame(part));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn decode_in_chunks(bytes: &[u8], chunk_size: usize) -> Vec<String> {
        let mut decoder = ChunkDecoder::new();
        let mut events = Vec::new();
        for chunk in bytes.chunks(chunk_size) {
            events.extend(decoder.push(chunk));
        }
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn emits_same_events_regardless_of_chunking() {
        let body = sample_stream();
        let expected: Vec<String> = body
            .split(EVENT_SEPARATOR)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        assert_eq!(expected.len(), 5);

        for chunk_size in [1, 2, 3, 5, 7, 64, body.len()] {
            assert_eq!(
                decode_in_chunks(body.as_bytes(), chunk_size),
                expected,
                "chunk size {chunk_size}"
            );
        }
    }

    #[test]
    fn multibyte_character_split_across_chunks_decodes_whole() {
        let bytes = "data: 🌍\n\n".as_bytes();
        let emoji_start = "data: ".len();
        let mut decoder = ChunkDecoder::new();

        assert!(decoder.push(&bytes[..emoji_start + 2]).is_empty());
        assert!(decoder.has_buffered_data());
        let events = decoder.push(&bytes[emoji_start + 2..]);
        assert_eq!(events, vec!["data: 🌍".to_string()]);
        assert!(!decoder.has_buffered_data());
    }

    #[test]
    fn separator_split_across_chunks_is_recognized() {
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.push(b"data: one\n").is_empty());
        assert_eq!(decoder.push(b"\ndata: two"), vec!["data: one".to_string()]);
        assert_eq!(decoder.finish(), vec!["data: two".to_string()]);
    }

    #[test]
    fn one_chunk_can_complete_several_events() {
        let mut decoder = ChunkDecoder::new();
        let events = decoder.push(b"data: a\n\ndata: b\n\ndata: c");
        assert_eq!(events, vec!["data: a".to_string(), "data: b".to_string()]);
        assert_eq!(decoder.finish(), vec!["data: c".to_string()]);
    }

    #[test]
    fn json_split_between_two_chunks_yields_one_delta() {
        let mut decoder = ChunkDecoder::new();
        let first = decoder.push(br#"data: {"choices":[{"delta":{"content":"Hel"#);
        assert!(first.is_empty());
        let second = decoder.push(b"lo\"}}]}\n\n");
        assert_eq!(second.len(), 1);
        assert_eq!(
            parse_event(&second[0]).expect("parse"),
            ParsedEvent::Delta("Hello".to_string())
        );
    }

    #[test]
    fn finish_ignores_blank_remainder_and_replaces_truncated_bytes() {
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.push(b"data: x\n\n  \n").len() == 1);
        assert!(decoder.finish().is_empty());

        let mut decoder = ChunkDecoder::new();
        decoder.push(&"data: é".as_bytes()[..7]);
        assert_eq!(decoder.finish(), vec!["data: \u{FFFD}".to_string()]);
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = ChunkDecoder::new();
        let events = decoder.push(b"data: a\xFFb\n\n");
        assert_eq!(events, vec!["data: a\u{FFFD}b".to_string()]);
    }

    #[test]
    fn done_sentinel_terminates_without_delta() {
        assert_eq!(parse_event("data: [DONE]").unwrap(), ParsedEvent::Done);
        assert_eq!(parse_event("  data:[DONE]  ").unwrap(), ParsedEvent::Done);
    }

    #[test]
    fn malformed_payload_is_a_recoverable_error() {
        let err = parse_event("data: not json").expect_err("should fail");
        assert_eq!(err.payload, "not json");
        assert!(matches!(err.cause, EventParseCause::Json(_)));
        assert!(err.source().is_some());

        let err = parse_event(r#"data: {"choices":[]}"#).expect_err("no choice");
        assert!(matches!(err.cause, EventParseCause::MissingChoice));
    }

    #[test]
    fn non_data_and_empty_deltas_produce_no_output() {
        assert_eq!(parse_event(": keep-alive").unwrap(), ParsedEvent::Ignored);
        assert_eq!(parse_event("event: ping").unwrap(), ParsedEvent::Ignored);
        assert_eq!(parse_event("").unwrap(), ParsedEvent::Ignored);
        assert_eq!(
            parse_event(r#"data: {"choices":[{"delta":{}}]}"#).unwrap(),
            ParsedEvent::Empty
        );
        assert_eq!(
            parse_event(r#"data: {"choices":[{"delta":{"content":""}}]}"#).unwrap(),
            ParsedEvent::Empty
        );
    }
}
