//! In-memory container backend for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ContainerBackend, ContainerLogs, ContainerSpec, ContainerState};
use crate::error::BackendError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum StdinBehavior {
    #[default]
    Accept,
    Block,
    Fail,
}

/// Scripted backend: every container behaves the same way
#[derive(Default)]
pub struct FakeBackend {
    missing_images: Vec<String>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: i64,
    echo_stdin: bool,
    hang: bool,
    oom: bool,
    run_time: Duration,
    start_failure: Option<(String, Option<i64>)>,
    fail_logs: bool,
    stdin_behavior: StdinBehavior,

    next_id: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
    pub killed: AtomicUsize,
    pub removed: AtomicUsize,
    specs: Mutex<Vec<ContainerSpec>>,
    stdin: Mutex<HashMap<String, Vec<u8>>>,
    stdin_writes: Mutex<Vec<Vec<u8>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(self, stdout: &str, stderr: &str, exit_code: i64) -> Self {
        self.with_raw_output(stdout.as_bytes().to_vec(), stderr.as_bytes().to_vec(), exit_code)
    }

    pub fn with_raw_output(mut self, stdout: Vec<u8>, stderr: Vec<u8>, exit_code: i64) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self.exit_code = exit_code;
        self
    }

    pub fn without_image(mut self, image: &str) -> Self {
        self.missing_images.push(image.to_string());
        self
    }

    /// Containers print whatever was written to their stdin
    pub fn echo_stdin(mut self) -> Self {
        self.echo_stdin = true;
        self
    }

    /// Containers never exit on their own
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn oom(mut self) -> Self {
        self.oom = true;
        self
    }

    pub fn with_run_time(mut self, run_time: Duration) -> Self {
        self.run_time = run_time;
        self
    }

    pub fn fail_start(mut self, message: &str, exit_code: Option<i64>) -> Self {
        self.start_failure = Some((message.to_string(), exit_code));
        self
    }

    pub fn fail_logs(mut self) -> Self {
        self.fail_logs = true;
        self
    }

    /// Stdin writes never complete, as with a full pipe nobody reads
    pub fn block_stdin(mut self) -> Self {
        self.stdin_behavior = StdinBehavior::Block;
        self
    }

    pub fn fail_stdin(mut self) -> Self {
        self.stdin_behavior = StdinBehavior::Fail;
        self
    }

    /// Containers currently created and not yet removed
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of containers alive at the same time
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn stdin_writes(&self) -> Vec<Vec<u8>> {
        self.stdin_writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError> {
        Ok(!self.missing_images.iter().any(|m| m == image))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, BackendError> {
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        self.specs.lock().unwrap().push(spec.clone());
        Ok(id)
    }

    async fn start(&self, _id: &str) -> Result<(), BackendError> {
        match &self.start_failure {
            Some((message, exit_code)) => Err(BackendError::ContainerFailed {
                message: message.clone(),
                exit_code: *exit_code,
            }),
            None => Ok(()),
        }
    }

    async fn write_stdin(&self, id: &str, data: &[u8]) -> Result<(), BackendError> {
        match self.stdin_behavior {
            StdinBehavior::Accept => {}
            StdinBehavior::Block => std::future::pending::<()>().await,
            StdinBehavior::Fail => {
                return Err(BackendError::Api {
                    status: 409,
                    message: "container is not running".into(),
                })
            }
        }
        self.stdin_writes.lock().unwrap().push(data.to_vec());
        self.stdin
            .lock()
            .unwrap()
            .insert(id.to_string(), data.to_vec());
        Ok(())
    }

    async fn wait(&self, _id: &str) -> Result<i64, BackendError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.run_time).await;
        Ok(self.exit_code)
    }

    async fn logs(&self, id: &str) -> Result<ContainerLogs, BackendError> {
        if self.fail_logs {
            return Err(BackendError::Unavailable("connection reset".into()));
        }
        let stdout = if self.echo_stdin {
            self.stdin.lock().unwrap().get(id).cloned().unwrap_or_default()
        } else {
            self.stdout.clone()
        };
        Ok(ContainerLogs {
            stdout,
            stderr: self.stderr.clone(),
        })
    }

    async fn inspect(&self, _id: &str) -> Result<ContainerState, BackendError> {
        Ok(ContainerState {
            oom_killed: self.oom,
            exit_code: Some(self.exit_code),
        })
    }

    async fn kill(&self, _id: &str) -> Result<(), BackendError> {
        self.killed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, _id: &str) -> Result<(), BackendError> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
