//! Source materialization
//!
//! Decodes submitted files, names them, and writes them into a fresh staging
//! directory that is bind-mounted read-only into the container.
//!
//! Decoding and naming happen before admission so malformed requests never
//! take an execution slot; writing happens right before the container starts.

use std::io;
use std::path::Path;
use std::sync::OnceLock;

use base64::Engine as _;
use regex::Regex;
use tempfile::TempDir;
use tokio::{fs, task};
use tracing::debug;

use crate::error::ExecutionError;
use crate::languages::RuntimeDescriptor;
use crate::models::{FileEncoding, SourceFile};

/// Entry symbol used when none can be found in the source
pub const DEFAULT_ENTRY_SYMBOL: &str = "Main";

const STAGING_PREFIX: &str = "vbase-rce-";

/// A decoded file ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub content: String,
}

/// Decoded and named sources of one request
#[derive(Debug, Clone)]
pub struct PreparedSources {
    files: Vec<StagedFile>,
    entry_symbol: Option<String>,
}

impl PreparedSources {
    /// Decode and name every file. The first file is the entry file.
    pub fn prepare(
        files: &[SourceFile],
        runtime: &RuntimeDescriptor,
    ) -> Result<Self, ExecutionError> {
        if files.is_empty() {
            return Err(ExecutionError::MissingFiles);
        }

        let mut staged = Vec::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            let name = file_name(file, runtime, index)?;
            let content = decode(file, &name)?;
            staged.push(StagedFile { name, content });
        }

        let entry_symbol = runtime
            .class_based
            .then(|| extract_class_name(&staged[0].content));

        Ok(Self {
            files: staged,
            entry_symbol,
        })
    }

    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    pub fn entry_file(&self) -> &str {
        &self.files[0].name
    }

    pub fn entry_content(&self) -> &str {
        &self.files[0].content
    }

    /// Public class name for class-based languages, `None` otherwise
    pub fn entry_symbol(&self) -> Option<&str> {
        self.entry_symbol.as_deref()
    }

    /// Write all files into a new execution-scoped directory.
    ///
    /// The directory is removed when the returned handle is dropped.
    pub async fn stage(&self) -> io::Result<TempDir> {
        let dir = task::spawn_blocking(|| tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir())
            .await
            .map_err(io::Error::other)??;
        // The container runs as a non-root user and must be able to read the mount
        set_mode(dir.path(), 0o755).await?;

        for file in &self.files {
            let path = dir.path().join(&file.name);
            fs::write(&path, &file.content).await?;
            set_mode(&path, 0o644).await?;
        }

        debug!(
            "Staged {} file(s) in {}",
            self.files.len(),
            dir.path().display()
        );
        Ok(dir)
    }
}

/// Remove a staging directory off the async workers
pub async fn unstage(dir: TempDir) -> io::Result<()> {
    task::spawn_blocking(move || dir.close())
        .await
        .map_err(io::Error::other)?
}

/// Decode a file's content according to its encoding
pub fn decode(file: &SourceFile, name: &str) -> Result<String, ExecutionError> {
    let encoding = file.encoding.unwrap_or_default();
    let invalid = |reason: String| ExecutionError::InvalidEncoding {
        file: name.to_string(),
        encoding,
        reason,
    };

    let bytes = match encoding {
        FileEncoding::Utf8 => return Ok(file.content.clone()),
        FileEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(file.content.trim())
            .map_err(|e| invalid(e.to_string()))?,
        FileEncoding::Hex => hex::decode(file.content.trim()).map_err(|e| invalid(e.to_string()))?,
    };

    String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))
}

/// On-disk name for a file.
///
/// Explicit names get the runtime extension appended when missing. Unnamed
/// entry files use the runtime default (`main.py`, `Main.java`); other unnamed
/// files are numbered so they never overwrite the entry file.
pub fn file_name(
    file: &SourceFile,
    runtime: &RuntimeDescriptor,
    index: usize,
) -> Result<String, ExecutionError> {
    match file.name.as_deref() {
        Some(name) => {
            validate_name(name)?;
            if name.ends_with(&runtime.extension) {
                Ok(name.to_string())
            } else {
                Ok(format!("{}{}", name, runtime.extension))
            }
        }
        None if index == 0 => Ok(runtime.default_file_name()),
        None => Ok(format!("file{}{}", index, runtime.extension)),
    }
}

fn validate_name(name: &str) -> Result<(), ExecutionError> {
    let is_plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if is_plain {
        Ok(())
    } else {
        Err(ExecutionError::InvalidFileName(name.to_string()))
    }
}

/// Best-effort scan for `public class <Name>`; falls back to `Main`
pub fn extract_class_name(content: &str) -> String {
    static CLASS_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

    CLASS_PATTERN
        .get_or_init(|| Regex::new(r"public\s+class\s+(\w+)").ok())
        .as_ref()
        .and_then(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_ENTRY_SYMBOL.to_string())
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
