//! Sandboxed runner implementation
//!
//! Drives one container through create -> start -> stdin -> bounded wait ->
//! logs -> OOM check, and removes it afterwards on every path.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{ContainerBackend, ContainerSpec, RunOutcome};
use crate::command::{Invocation, CODE_DIR};
use crate::config::SecurityProfile;
use crate::error::BackendError;
use crate::limits::RunLimits;

/// Runner that executes untrusted code in a locked-down container
#[derive(Clone)]
pub struct SandboxRunner {
    backend: Arc<dyn ContainerBackend>,
    profile: Arc<SecurityProfile>,
}

impl SandboxRunner {
    pub fn new(backend: Arc<dyn ContainerBackend>, profile: Arc<SecurityProfile>) -> Self {
        Self { backend, profile }
    }

    pub fn backend(&self) -> &Arc<dyn ContainerBackend> {
        &self.backend
    }

    /// Container configuration for one invocation
    pub fn container_spec(
        &self,
        image: &str,
        invocation: &Invocation,
        staging_dir: &Path,
        open_stdin: bool,
        limits: &RunLimits,
    ) -> ContainerSpec {
        let profile = &self.profile;
        let scratch = format!("size={},mode=1777,exec", profile.tmpfs_size);
        let tmpfs = HashMap::from([
            ("/tmp".to_string(), scratch.clone()),
            (profile.user_home.clone(), scratch),
        ]);

        ContainerSpec {
            image: image.to_string(),
            cmd: invocation.to_argv(),
            staging_dir: staging_dir.to_path_buf(),
            mount_target: CODE_DIR.to_string(),
            working_dir: CODE_DIR.to_string(),
            user: profile.user.clone(),
            network_disabled: profile.network_disabled,
            memory_bytes: limits.memory.bytes(),
            nano_cpus: profile.nano_cpus,
            pids_limit: profile.pids_limit,
            cap_drop: profile.cap_drop.clone(),
            security_opt: profile.security_opt.clone(),
            read_only_rootfs: profile.read_only_rootfs,
            tmpfs,
            open_stdin,
        }
    }

    /// Run an invocation to completion.
    ///
    /// Program failures (non-zero exit, timeout, OOM, rejected command) are
    /// returned as `Ok` outcomes. `Err` is reserved for backend failures.
    pub async fn run(
        &self,
        image: &str,
        invocation: &Invocation,
        staging_dir: &Path,
        stdin: Option<&str>,
        limits: &RunLimits,
    ) -> Result<RunOutcome, BackendError> {
        let stdin = stdin.filter(|s| !s.is_empty());
        let spec = self.container_spec(image, invocation, staging_dir, stdin.is_some(), limits);

        let id = self.backend.create(&spec).await?;
        debug!(
            "Created container {} from {} (timeout: {}s, memory: {})",
            id, image, limits.timeout_secs, limits.memory
        );

        let result = self.drive(&id, stdin, limits.timeout_secs).await;

        // Removal must not mask the primary result
        if let Err(e) = self.backend.remove(&id).await {
            warn!("Failed to remove container {}: {}", id, e);
        }

        result
    }

    async fn drive(
        &self,
        id: &str,
        stdin: Option<&str>,
        timeout_secs: u64,
    ) -> Result<RunOutcome, BackendError> {
        match self.backend.start(id).await {
            Ok(()) => {}
            Err(BackendError::ContainerFailed { message, exit_code }) => {
                info!("Container {} failed to start: {}", id, message);
                return Ok(RunOutcome::container_failed(message, exit_code));
            }
            Err(e) => return Err(e),
        }

        // Stdin delivery and the wait share one budget
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);

        if let Some(input) = stdin {
            match timeout_at(deadline, self.backend.write_stdin(id, input.as_bytes())).await {
                Ok(Ok(())) => {}
                // The program may exit without reading its input
                Ok(Err(e)) => warn!("Failed to write stdin to container {}: {}", id, e),
                Err(_elapsed) => return Ok(self.kill_timed_out(id, timeout_secs).await),
            }
        }

        let exit_code = match timeout_at(deadline, self.backend.wait(id)).await {
            Ok(code) => code?,
            Err(_elapsed) => return Ok(self.kill_timed_out(id, timeout_secs).await),
        };

        let logs = self.backend.logs(id).await?;
        let outcome = RunOutcome::exited(
            String::from_utf8_lossy(&logs.stdout).into_owned(),
            String::from_utf8_lossy(&logs.stderr).into_owned(),
            exit_code,
        );

        let state = self.backend.inspect(id).await?;
        if state.oom_killed {
            info!("Container {} was killed for exceeding its memory limit", id);
            return Ok(outcome.into_oom_killed());
        }

        debug!("Container {} exited with code {}", id, exit_code);
        Ok(outcome)
    }

    async fn kill_timed_out(&self, id: &str, timeout_secs: u64) -> RunOutcome {
        info!("Container {} timed out after {}s, killing", id, timeout_secs);
        if let Err(e) = self.backend.kill(id).await {
            warn!("Failed to kill timed out container {}: {}", id, e);
        }
        RunOutcome::timed_out(timeout_secs)
    }
}
