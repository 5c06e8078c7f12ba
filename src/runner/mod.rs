//! Runner module - Sandboxed execution against a container backend
//!
//! - `ContainerBackend`: the container management surface the runner drives
//! - `DockerBackend`: implementation over the Docker Engine API
//! - `SandboxRunner`: the per-execution container protocol
//!
//! The runner module does NOT:
//! - Know about languages or command templates
//! - Resolve limits from requests
//! - Decide on the shape of the API response

pub mod docker;
pub mod sandboxed;

#[cfg(test)]
pub mod testing;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::BackendError;

pub use docker::DockerBackend;
pub use sandboxed::SandboxRunner;

/// Signal reported for killed executions (timeout and OOM)
pub const SIGKILL: &str = "SIGKILL";

/// Exit code reported for out-of-memory kills
pub const OOM_EXIT_CODE: i64 = 137;

/// Exit code reported for timed out executions
pub const TIMEOUT_EXIT_CODE: i64 = -1;

/// Exit code used when the backend rejects a container without reporting one
pub const CONTAINER_FAILED_EXIT_CODE: i64 = 127;

/// Appended to stderr when the container was OOM killed
pub const OOM_MARKER: &str = "\n[Process killed: Out of memory]";

/// Everything needed to create one sandbox container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    /// Host directory mounted read-only at `mount_target`
    pub staging_dir: PathBuf,
    pub mount_target: String,
    pub working_dir: String,
    pub user: String,
    pub network_disabled: bool,
    /// Memory limit in bytes; swap is capped to the same value
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub read_only_rootfs: bool,
    /// Writable scratch mounts: path -> mount options
    pub tmpfs: HashMap<String, String>,
    /// Keep stdin open until it has been written and closed
    pub open_stdin: bool,
}

/// Captured container output, still as raw bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Container state after it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub oom_killed: bool,
    pub exit_code: Option<i64>,
}

/// Container management operations used by the sandbox runner.
///
/// Implementations must be safe to share across concurrent executions.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Check the backend is reachable
    async fn ping(&self) -> Result<(), BackendError>;

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError>;

    /// Create a container and return its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String, BackendError>;

    async fn start(&self, id: &str) -> Result<(), BackendError>;

    /// Write `data` to the container's stdin and close it
    async fn write_stdin(&self, id: &str, data: &[u8]) -> Result<(), BackendError>;

    /// Wait until the container exits and return its exit code
    async fn wait(&self, id: &str) -> Result<i64, BackendError>;

    async fn logs(&self, id: &str) -> Result<ContainerLogs, BackendError>;

    async fn inspect(&self, id: &str) -> Result<ContainerState, BackendError>;

    async fn kill(&self, id: &str) -> Result<(), BackendError>;

    /// Remove the container, killing it if still running
    async fn remove(&self, id: &str) -> Result<(), BackendError>;
}

/// Raw outcome of one sandbox invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub signal: Option<String>,
}

impl RunOutcome {
    /// Program ran to completion (successfully or not)
    pub fn exited(stdout: String, stderr: String, exit_code: i64) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: Some(exit_code),
            signal: None,
        }
    }

    /// Wait budget exhausted; the container was killed
    pub fn timed_out(timeout_secs: u64) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Execution timed out after {} seconds", timeout_secs),
            exit_code: Some(TIMEOUT_EXIT_CODE),
            signal: Some(SIGKILL.to_string()),
        }
    }

    /// Backend refused to run the container (bad command, missing binary)
    pub fn container_failed(message: String, exit_code: Option<i64>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message,
            exit_code: Some(exit_code.unwrap_or(CONTAINER_FAILED_EXIT_CODE)),
            signal: None,
        }
    }

    /// Override the result after the backend reported an OOM kill
    pub fn into_oom_killed(mut self) -> Self {
        self.stderr.push_str(OOM_MARKER);
        self.exit_code = Some(OOM_EXIT_CODE);
        self.signal = Some(SIGKILL.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none()
    }
}
