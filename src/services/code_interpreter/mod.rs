//! Hosted Code Interpreter
//!
//! The analysis stage hands tool datasets to a hosted assistant that can run
//! code over attached files. Every file uploaded or produced during a run is
//! ephemeral and tracked by a `FileLease`, which deletes them all once the
//! run is over.

pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::error::AppResult;

pub use openai::OpenAiCodeInterpreter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadRole {
    User,
    Assistant,
}

/// One message replayed into a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: ThreadRole,
    pub content: String,
    /// Uploaded files attached to this message
    #[serde(default)]
    pub file_ids: Vec<String>,
}

impl ThreadMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ThreadRole::User,
            content: content.into(),
            file_ids: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ThreadRole::Assistant,
            content: content.into(),
            file_ids: Vec::new(),
        }
    }

    pub fn with_files(mut self, file_ids: Vec<String>) -> Self {
        self.file_ids = file_ids;
        self
    }
}

/// Final state of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
    RequiresAction,
    /// Deadline passed while the run was still going
    TimedOut,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

/// A file the assistant produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFile {
    pub file_id: String,
    pub file_name: String,
}

/// What the assistant left in the thread after a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadOutput {
    pub text: Option<String>,
    pub files: Vec<OutputFile>,
}

#[async_trait]
pub trait CodeInterpreter: Send + Sync {
    /// Upload a file for use in threads, returning its id.
    async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> AppResult<String>;

    /// Create a thread seeded with `messages`, returning its id.
    async fn create_thread(&self, messages: Vec<ThreadMessage>) -> AppResult<String>;

    /// Run the assistant on a thread until it reaches a final status.
    async fn run_thread(&self, thread_id: &str, instructions: &str) -> AppResult<RunStatus>;

    /// Latest assistant reply and the files it produced.
    async fn list_output_files(&self, thread_id: &str) -> AppResult<ThreadOutput>;

    async fn download_file(&self, file_id: &str) -> AppResult<Vec<u8>>;

    async fn delete_file(&self, file_id: &str) -> AppResult<()>;
}

/// Ephemeral files owned by one analysis run.
pub struct FileLease {
    interpreter: Arc<dyn CodeInterpreter>,
    file_ids: Vec<String>,
    released: bool,
}

impl FileLease {
    pub fn new(interpreter: Arc<dyn CodeInterpreter>) -> Self {
        Self {
            interpreter,
            file_ids: Vec::new(),
            released: false,
        }
    }

    /// Upload a file and take ownership of it.
    pub async fn upload(&mut self, file_name: &str, bytes: Vec<u8>) -> AppResult<String> {
        let id = self.interpreter.upload_file(file_name, bytes).await?;
        self.file_ids.push(id.clone());
        Ok(id)
    }

    /// Take ownership of a file created elsewhere, e.g. an assistant output.
    pub fn adopt(&mut self, file_id: impl Into<String>) {
        let file_id = file_id.into();
        if !self.file_ids.contains(&file_id) {
            self.file_ids.push(file_id);
        }
    }

    /// Delete every owned file. Later calls do nothing.
    ///
    /// Returns how many deletions succeeded; failures are logged.
    pub async fn release(&mut self) -> usize {
        if self.released {
            return 0;
        }
        self.released = true;
        let mut deleted = 0;
        for id in self.file_ids.drain(..) {
            match self.interpreter.delete_file(&id).await {
                Ok(()) => deleted += 1,
                Err(e) => tracing::warn!(file_id = %id, error = %e, "failed to delete interpreter file"),
            }
        }
        deleted
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        if !self.released && !self.file_ids.is_empty() {
            tracing::error!(files = ?self.file_ids, "file lease dropped without release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::AppError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CodeInterpreter for Recorder {
        async fn upload_file(&self, file_name: &str, _bytes: Vec<u8>) -> AppResult<String> {
            Ok(format!("file-{}", file_name))
        }
        async fn create_thread(&self, _messages: Vec<ThreadMessage>) -> AppResult<String> {
            Ok("thread".into())
        }
        async fn run_thread(&self, _thread_id: &str, _instructions: &str) -> AppResult<RunStatus> {
            Ok(RunStatus::Completed)
        }
        async fn list_output_files(&self, _thread_id: &str) -> AppResult<ThreadOutput> {
            Ok(ThreadOutput::default())
        }
        async fn download_file(&self, _file_id: &str) -> AppResult<Vec<u8>> {
            Err(AppError::not_found("no content"))
        }
        async fn delete_file(&self, file_id: &str) -> AppResult<()> {
            self.deleted.lock().unwrap().push(file_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_release_deletes_each_file_once() {
        let recorder = Arc::new(Recorder::default());
        let mut lease = FileLease::new(recorder.clone());
        lease.upload("a.csv", vec![]).await.unwrap();
        lease.adopt("file-out");
        lease.adopt("file-out");

        assert_eq!(lease.release().await, 2);
        assert_eq!(lease.release().await, 0);
        assert_eq!(
            *recorder.deleted.lock().unwrap(),
            vec!["file-a.csv".to_string(), "file-out".to_string()]
        );
    }
}
