use std::error::Error;
use std::fmt;

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::decoder::{parse_event, ChunkDecoder, ParsedEvent};

/// Receives the accumulated response text. `streaming` is false exactly once,
/// on normal completion.
pub trait DeltaSink {
    fn on_delta(&mut self, text: &str, streaming: bool);
}

impl<F> DeltaSink for F
where
    F: FnMut(&str, bool),
{
    fn on_delta(&mut self, text: &str, streaming: bool) {
        self(text, streaming)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(String),
    /// Cancelled by the caller; holds the text accumulated so far.
    Cancelled(String),
}

impl StreamOutcome {
    pub fn text(&self) -> &str {
        match self {
            StreamOutcome::Completed(text) | StreamOutcome::Cancelled(text) => text,
        }
    }
}

#[derive(Debug)]
pub enum StreamError {
    Transport(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Transport(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StreamError::Transport(err) => Some(err.as_ref()),
        }
    }
}

enum Read<T> {
    Cancelled,
    Chunk(Option<T>),
}

enum Step {
    Continue,
    Done,
    Cancelled,
}

/// Drives one response body to a terminal outcome.
///
/// Chunks are read sequentially, so deltas reach the sink in byte order.
/// Cancellation is checked between reads and before every sink call; once it
/// is observed the sink is not called again and the partial text is returned.
pub struct StreamSession<'a, K: DeltaSink> {
    cancel: &'a CancellationToken,
    sink: K,
    decoder: ChunkDecoder,
    accumulated: String,
}

impl<'a, K: DeltaSink> StreamSession<'a, K> {
    pub fn new(cancel: &'a CancellationToken, sink: K) -> Self {
        Self {
            cancel,
            sink,
            decoder: ChunkDecoder::new(),
            accumulated: String::new(),
        }
    }

    pub async fn run<S, B, E>(mut self, mut chunks: S) -> Result<StreamOutcome, StreamError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let cancel = self.cancel;
        if cancel.is_cancelled() {
            return Ok(StreamOutcome::Cancelled(self.accumulated));
        }
        self.sink.on_delta("", true);

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => Read::Cancelled,
                next = chunks.next() => Read::Chunk(next),
            };

            let chunk = match read {
                Read::Cancelled => {
                    debug!(chars = self.accumulated.len(), "stream cancelled");
                    return Ok(StreamOutcome::Cancelled(self.accumulated));
                }
                Read::Chunk(None) => break,
                Read::Chunk(Some(chunk)) => chunk,
            };
            let chunk = chunk.map_err(|err| StreamError::Transport(err.into()))?;

            let events = self.decoder.push(chunk.as_ref());
            match self.handle_events(events) {
                Step::Continue => {}
                Step::Done => return Ok(self.complete()),
                Step::Cancelled => return Ok(StreamOutcome::Cancelled(self.accumulated)),
            }
        }

        let trailing = self.decoder.finish();
        if !trailing.is_empty() {
            warn!(
                events = trailing.len(),
                "stream closed with an unterminated event; accepting it"
            );
        }
        match self.handle_events(trailing) {
            Step::Cancelled => Ok(StreamOutcome::Cancelled(self.accumulated)),
            Step::Continue | Step::Done => Ok(self.complete()),
        }
    }

    fn handle_events(&mut self, events: Vec<String>) -> Step {
        for event in events {
            match parse_event(&event) {
                Ok(ParsedEvent::Delta(delta)) => {
                    if self.cancel.is_cancelled() {
                        return Step::Cancelled;
                    }
                    self.accumulated.push_str(&delta);
                    self.sink.on_delta(&self.accumulated, true);
                }
                Ok(ParsedEvent::Done) => return Step::Done,
                Ok(ParsedEvent::Empty | ParsedEvent::Ignored) => {}
                Err(err) => warn!(error = %err, "skipping malformed stream event"),
            }
        }
        Step::Continue
    }

    fn complete(mut self) -> StreamOutcome {
        self.sink.on_delta(&self.accumulated, false);
        StreamOutcome::Completed(self.accumulated)
    }
}
