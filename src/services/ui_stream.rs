//! Streaming UI Channel
//!
//! Single-writer channel of UI fragments for one turn. The orchestrator is
//! the only writer; the HTTP layer subscribes and forwards fragments as
//! server-sent events. The channel is finished exactly once with a terminal
//! fragment, after which every write is ignored.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One incremental UI update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiFragment {
    TurnStarted {
        turn_id: String,
        chat_id: String,
    },
    /// Progress line, e.g. "Looking up orders"
    Status {
        stage: String,
        message: String,
    },
    ToolActivity {
        tool_call_id: String,
        tool_name: String,
        rows: usize,
        is_error: bool,
    },
    AnalysisReady {
        tables: Vec<String>,
    },
    FileReady {
        url: String,
        description: String,
    },
    TextDelta {
        content: String,
    },
    /// Terminal: final answer
    Answer {
        text: String,
    },
    /// Terminal: failure card; `retryable` drives the retry button
    Error {
        message: String,
        retryable: bool,
    },
}

impl UiFragment {
    pub fn status(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UiFragment::Answer { .. } | UiFragment::Error { .. })
    }
}

/// Writer half
pub struct UiStream {
    tx: mpsc::UnboundedSender<UiFragment>,
    closed: AtomicBool,
}

/// Reader half
pub type UiReceiver = mpsc::UnboundedReceiver<UiFragment>;

impl UiStream {
    pub fn channel() -> (Self, UiReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a non-terminal fragment. Returns false once the stream is closed.
    ///
    /// A dropped subscriber does not stop the turn.
    pub fn emit(&self, fragment: UiFragment) -> bool {
        if fragment.is_terminal() {
            return self.finish(fragment);
        }
        if self.is_closed() {
            tracing::debug!(?fragment, "ui stream closed, fragment dropped");
            return false;
        }
        let _ = self.tx.send(fragment);
        true
    }

    /// Send the terminal fragment and close. Only the first call has effect.
    pub fn finish(&self, terminal: UiFragment) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::warn!("ui stream already finished");
            return false;
        }
        let _ = self.tx.send(terminal);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finish_is_exactly_once() {
        let (stream, mut rx) = UiStream::channel();
        assert!(stream.emit(UiFragment::status("inquiry", "Routing question")));
        assert!(stream.finish(UiFragment::Answer { text: "done".into() }));
        assert!(!stream.finish(UiFragment::Error {
            message: "late".into(),
            retryable: true
        }));
        assert!(!stream.emit(UiFragment::TextDelta { content: "x".into() }));
        drop(stream);

        let mut seen = Vec::new();
        while let Some(f) = rx.recv().await {
            seen.push(f);
        }
        assert_eq!(seen.len(), 2);
        assert!(seen[1].is_terminal());
    }

    #[test]
    fn test_emit_terminal_closes() {
        let (stream, _rx) = UiStream::channel();
        assert!(stream.emit(UiFragment::Error {
            message: "x".into(),
            retryable: true
        }));
        assert!(stream.is_closed());
    }

    #[test]
    fn test_dropped_receiver_does_not_fail_writer() {
        let (stream, rx) = UiStream::channel();
        drop(rx);
        assert!(stream.emit(UiFragment::status("writer", "Writing")));
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(UiFragment::TextDelta { content: "Hi".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"event": "text_delta", "content": "Hi"}));
    }
}
