//! Stage outcomes
//!
//! Stages never return `Err`. Every failure is folded into a
//! `StageOutcome` with `is_error` set, and the orchestrator decides what the
//! user sees.

use std::fmt;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Inquiry,
    Manager,
    Analysis,
    FileCheck,
    FileProgrammer,
    Writer,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Inquiry => "inquiry",
            Stage::Manager => "manager",
            Stage::Analysis => "analysis",
            Stage::FileCheck => "file_check",
            Stage::FileProgrammer => "file_programmer",
            Stage::Writer => "writer",
        }
    }

    /// Progress line shown while the stage runs.
    pub fn status_message(&self) -> &'static str {
        match self {
            Stage::Inquiry => "Working out where to look",
            Stage::Manager => "Querying your data",
            Stage::Analysis => "Analyzing the results",
            Stage::FileCheck => "Checking whether you need a file",
            Stage::FileProgrammer => "Preparing your file",
            Stage::Writer => "Writing the answer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stage: a payload plus an error flag.
///
/// When `is_error` is set, the payload is a placeholder and must not be
/// used by later stages.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome<T> {
    pub is_error: bool,
    pub error: Option<String>,
    pub payload: T,
}

impl<T> StageOutcome<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            is_error: false,
            error: None,
            payload,
        }
    }

    /// Failure that still carries a payload, e.g. the writer's fallback text.
    pub fn failed_with(payload: T, error: impl Into<String>) -> Self {
        Self {
            is_error: true,
            error: Some(error.into()),
            payload,
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        if self.is_error {
            Err(self.error.unwrap_or_else(|| "stage failed".to_string()))
        } else {
            Ok(self.payload)
        }
    }
}

impl<T: Default> StageOutcome<T> {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::failed_with(T::default(), error)
    }
}
