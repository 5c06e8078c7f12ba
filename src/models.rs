//! API data model (Piston v2 compatible)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::languages::RuntimeDescriptor;

/// Encoding of a submitted file's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    #[default]
    Utf8,
    Base64,
    Hex,
}

impl fmt::Display for FileEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileEncoding::Utf8 => "utf8",
            FileEncoding::Base64 => "base64",
            FileEncoding::Hex => "hex",
        };
        write!(f, "{}", s)
    }
}

/// A file to be executed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    #[serde(default)]
    pub name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub encoding: Option<FileEncoding>,
}

impl SourceFile {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            name: None,
            content: content.into(),
            encoding: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_encoding(mut self, encoding: FileEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }
}

/// Request body for code execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Language name or alias
    pub language: String,
    /// Version selector (accepted, not used for selection)
    #[serde(default)]
    pub version: String,
    /// Files to execute; the first one is the entry file
    pub files: Vec<SourceFile>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// Run timeout in milliseconds
    #[serde(default)]
    pub run_timeout: Option<i64>,
    /// Compile timeout in milliseconds
    #[serde(default)]
    pub compile_timeout: Option<i64>,
    /// Run memory limit in bytes (-1 for default)
    #[serde(default)]
    pub run_memory_limit: Option<i64>,
    /// Compile memory limit in bytes; unused since compile and run share a container
    #[serde(default)]
    pub compile_memory_limit: Option<i64>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, files: Vec<SourceFile>) -> Self {
        Self {
            language: language.into(),
            version: "*".to_string(),
            files,
            stdin: None,
            args: None,
            run_timeout: None,
            compile_timeout: None,
            run_memory_limit: None,
            compile_memory_limit: None,
        }
    }
}

/// Result from a compile or run stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stdout: String,
    pub stderr: String,
    /// stdout followed by stderr
    pub output: String,
    /// Exit code, null if terminated by signal
    pub code: Option<i64>,
    /// Signal name, null if exited normally
    pub signal: Option<String>,
}

impl StageResult {
    pub fn new(stdout: String, stderr: String, code: Option<i64>, signal: Option<String>) -> Self {
        let output = format!("{}{}", stdout, stderr);
        Self {
            stdout,
            stderr,
            output,
            code,
            signal,
        }
    }
}

/// Response body for code execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Canonical language name (not the alias used in the request)
    pub language: String,
    pub version: String,
    pub run: StageResult,
    /// Always null: compiled languages run both stages in one container
    pub compile: Option<StageResult>,
}

/// Available runtime information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub language: String,
    pub version: String,
    pub aliases: Vec<String>,
    pub runtime: Option<String>,
}

impl From<&RuntimeDescriptor> for RuntimeInfo {
    fn from(rt: &RuntimeDescriptor) -> Self {
        Self {
            language: rt.language.clone(),
            version: rt.version.clone(),
            aliases: rt.aliases.clone(),
            runtime: rt.runtime.clone(),
        }
    }
}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
