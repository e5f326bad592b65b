//! Streamable Values
//!
//! A `StreamableValue` is an incrementally updated value exposed to readers
//! before it is finalized. There is exactly one writer (the value itself is
//! not `Clone`); readers subscribe through a `tokio::sync::watch` receiver
//! and see the latest snapshot.
//!
//! Once marked done (or failed) the value is frozen: every later write
//! returns `ArtifactError::AlreadyDone`. Readers treat `done == false` as
//! "still generating".

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

/// Errors returned by writes to a `StreamableValue`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact is already done")]
    AlreadyDone,
}

/// Point-in-time view of a streamable value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactSnapshot<T> {
    pub value: Option<T>,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Default for ArtifactSnapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            done: false,
            error: None,
        }
    }
}

/// Single-writer, append-only value with a terminal "done" transition.
#[derive(Debug)]
pub struct StreamableValue<T> {
    tx: watch::Sender<ArtifactSnapshot<T>>,
}

impl<T: Clone + Send + Sync> StreamableValue<T> {
    /// Create an empty, not-yet-done value.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ArtifactSnapshot::default());
        Self { tx }
    }

    /// Subscribe to snapshots. The receiver starts at the current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ArtifactSnapshot<T>> {
        self.tx.subscribe()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> ArtifactSnapshot<T> {
        self.tx.borrow().clone()
    }

    /// Mark the value done, optionally replacing it with a final payload.
    pub fn done(&self, value: Option<T>) -> Result<(), ArtifactError> {
        self.ensure_open()?;
        self.tx.send_modify(|snap| {
            if let Some(v) = value {
                snap.value = Some(v);
            }
            snap.done = true;
        });
        Ok(())
    }

    /// Mark the value done with an error. The last value is kept.
    pub fn fail(&self, error: impl Into<String>) -> Result<(), ArtifactError> {
        self.ensure_open()?;
        let error = error.into();
        self.tx.send_modify(|snap| {
            snap.error = Some(error);
            snap.done = true;
        });
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), ArtifactError> {
        if self.tx.borrow().done {
            return Err(ArtifactError::AlreadyDone);
        }
        Ok(())
    }
}

impl StreamableValue<String> {
    /// Append text to the current value.
    pub fn append(&self, delta: &str) -> Result<(), ArtifactError> {
        self.ensure_open()?;
        self.tx.send_modify(|snap| match snap.value.as_mut() {
            Some(text) => text.push_str(delta),
            None => snap.value = Some(delta.to_string()),
        });
        Ok(())
    }
}

impl<T: Clone + Send + Sync> Default for StreamableValue<T> {
    fn default() -> Self {
        Self::new()
    }
}
