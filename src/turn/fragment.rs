//! Reply fragments and the stream callers consume

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// Wire form of the end marker
pub const END_MARKER: &str = "<END>";

/// One element of a reply stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// A piece of the reply, in emission order
    Text(String),
    /// Generation failed part-way; always followed by `End`
    Error(String),
    /// Stream complete. Nothing follows it.
    End,
}

impl Fragment {
    pub fn is_end(&self) -> bool {
        matches!(self, Fragment::End)
    }

    /// Text as it would go over the wire
    pub fn as_str(&self) -> &str {
        match self {
            Fragment::Text(text) | Fragment::Error(text) => text,
            Fragment::End => END_MARKER,
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiving half of a turn's reply.
///
/// Yields `Fragment::End` exactly once and then terminates. Dropping it tells
/// the producer to stop consuming generation output.
#[derive(Debug)]
pub struct TurnStream {
    rx: mpsc::Receiver<Fragment>,
    finished: bool,
}

impl TurnStream {
    pub(crate) fn new(rx: mpsc::Receiver<Fragment>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Collects the reply text, stopping at the end marker
    pub async fn collect_text(mut self) -> String {
        use futures::StreamExt;

        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            if let Fragment::Text(piece) = fragment {
                text.push_str(&piece);
            }
        }
        text
    }
}

impl Stream for TurnStream {
    type Item = Fragment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Fragment>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(fragment)) => {
                if fragment.is_end() {
                    self.finished = true;
                    self.rx.close();
                }
                Poll::Ready(Some(fragment))
            }
            // Producer vanished without a marker; close the stream properly
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(Fragment::End))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Splits a precomputed answer into word fragments
pub fn split_answer(answer: &str) -> Vec<String> {
    answer
        .split_whitespace()
        .map(|word| format!("{} ", word))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_split_answer() {
        assert_eq!(split_answer("Hi there!"), vec!["Hi ", "there! "]);
        assert!(split_answer("   ").is_empty());
    }

    #[test]
    fn test_wire_form() {
        assert_eq!(Fragment::End.to_string(), "<END>");
        assert_eq!(Fragment::Text("a".into()).as_str(), "a");
    }

    #[tokio::test]
    async fn test_nothing_after_end() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(Fragment::Text("a".into())).await.unwrap();
        tx.send(Fragment::End).await.unwrap();
        let _ = tx.send(Fragment::Text("late".into())).await;

        let items: Vec<_> = TurnStream::new(rx).collect().await;
        assert_eq!(items, vec![Fragment::Text("a".into()), Fragment::End]);
    }

    #[tokio::test]
    async fn test_dropped_producer_still_ends() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(Fragment::Text("partial".into())).await.unwrap();
        drop(tx);

        let items: Vec<_> = TurnStream::new(rx).collect().await;
        assert_eq!(items.last(), Some(&Fragment::End));
        assert_eq!(items.len(), 2);
    }
}
