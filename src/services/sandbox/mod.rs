//! Sandboxed Code Execution
//!
//! Generated code runs in an isolated, short-lived remote environment.
//! `SandboxProvider` creates sessions; `SandboxExecutor` drives one session
//! through install, upload and run, and always closes it.

pub mod e2b;
pub mod executor;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::error::AppResult;

pub use e2b::E2bSandboxProvider;
pub use executor::{
    find_data_uri, parse_data_uri, DataUri, FileArtifact, SandboxExecutor, SandboxFailure,
    SandboxRequest,
};

/// One value produced by a code cell
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellResult {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub is_main_result: bool,
}

/// Exception raised by a code cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellError {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub traceback: String,
}

/// Everything one code cell produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub results: Vec<CellResult>,
    pub error: Option<CellError>,
}

/// Creates isolated environments
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self, env: HashMap<String, String>) -> AppResult<Box<dyn SandboxSession>>;
}

/// One live environment
#[async_trait]
pub trait SandboxSession: Send + Sync {
    fn id(&self) -> &str;

    async fn install(&self, packages: &[String]) -> AppResult<()>;

    /// Upload a file, returning its absolute path inside the environment.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> AppResult<String>;

    async fn run_code(&self, code: &str) -> AppResult<Execution>;

    async fn close(&self) -> AppResult<()>;
}
