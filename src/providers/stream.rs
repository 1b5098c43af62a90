//! Line-oriented decoding of streamed HTTP bodies
//!
//! Both server-sent events and newline-delimited JSON arrive as arbitrary byte
//! chunks. This module reassembles complete lines and hands each to a
//! provider-specific parser, yielding text deltas in arrival order.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;

use crate::providers::{ProviderError, TextStream};

/// What a single decoded line means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A piece of generated text
    Text(String),
    /// The provider signalled completion
    Done,
}

type LineParser = Box<dyn Fn(&str) -> Result<Option<LineEvent>, ProviderError> + Send>;

struct LineState {
    body: BoxStream<'static, Result<Bytes, ProviderError>>,
    buffer: String,
    pending: VecDeque<Result<String, ProviderError>>,
    finished: bool,
    parse: LineParser,
}

impl LineState {
    /// Parses every complete line currently buffered
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.handle_line(line.trim());
            if self.finished {
                self.buffer.clear();
                return;
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        match (self.parse)(line) {
            Ok(Some(LineEvent::Text(text))) if !text.is_empty() => {
                self.pending.push_back(Ok(text));
            }
            Ok(Some(LineEvent::Done)) => self.finished = true,
            Ok(_) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// Turns a chunked byte body into a stream of text deltas
pub fn decode_lines<S, F>(body: S, parse: F) -> TextStream
where
    S: futures::Stream<Item = Result<Bytes, ProviderError>> + Send + 'static,
    F: Fn(&str) -> Result<Option<LineEvent>, ProviderError> + Send + 'static,
{
    let state = LineState {
        body: body.boxed(),
        buffer: String::new(),
        pending: VecDeque::new(),
        finished: false,
        parse: Box::new(parse),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.push_back(Err(e));
                }
                None => {
                    // Body ended; a trailing line may lack its newline
                    let rest = std::mem::take(&mut state.buffer);
                    state.handle_line(rest.trim());
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Adapts a reqwest body stream to the provider error type
pub fn body_stream(response: reqwest::Response) -> BoxStream<'static, Result<Bytes, ProviderError>> {
    response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| ProviderError::network(format!("Stream error: {}", e))))
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl futures::Stream<Item = Result<Bytes, ProviderError>> + Send + 'static {
        let owned: Vec<Result<Bytes, ProviderError>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        stream::iter(owned)
    }

    fn plain(line: &str) -> Result<Option<LineEvent>, ProviderError> {
        match line {
            "END" => Ok(Some(LineEvent::Done)),
            "BAD" => Err(ProviderError::serialization("bad line")),
            other => Ok(Some(LineEvent::Text(other.to_string()))),
        }
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let stream = decode_lines(chunks(&["Hel", "lo\nwor", "ld\n"]), plain);
        let items: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec!["Hello", "world"]);
    }

    #[tokio::test]
    async fn test_done_stops_stream() {
        let stream = decode_lines(chunks(&["a\nEND\nb\n"]), plain);
        let items: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec!["a"]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let stream = decode_lines(chunks(&["a\nb"]), plain);
        let items: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_parse_error_is_last_item() {
        let stream = decode_lines(chunks(&["a\nBAD\nc\n"]), plain);
        let items: Vec<Result<String, ProviderError>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_body_error_surfaces() {
        let body = stream::iter(vec![
            Ok(Bytes::from("a\n")),
            Err(ProviderError::network("reset")),
        ]);
        let items: Vec<Result<String, ProviderError>> = decode_lines(body, plain).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ProviderError::Network { .. })));
    }
}
