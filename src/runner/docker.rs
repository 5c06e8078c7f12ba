//! Docker backend using bollard
//!
//! Translates `ContainerSpec` into Docker Engine API calls and classifies
//! bollard errors into `BackendError` kinds.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerWaitResponse, HostConfig};
use bollard::Docker;
use futures_util::stream::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{ContainerBackend, ContainerLogs, ContainerSpec, ContainerState};
use crate::error::BackendError;

/// Label put on every container created by this service
pub const MANAGED_LABEL: &str = "vbase-rce.managed";

/// Container backend talking to a Docker daemon
#[derive(Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket)
    pub fn connect() -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults().map_err(classify)?;
        Ok(Self { docker })
    }

    /// Translate a `ContainerSpec` into a bollard container config
    pub fn to_bollard_config(spec: &ContainerSpec) -> Config<String> {
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:ro",
                spec.staging_dir.display(),
                spec.mount_target
            )]),
            memory: Some(spec.memory_bytes),
            // Equal to memory: no swap on top of the limit
            memory_swap: Some(spec.memory_bytes),
            nano_cpus: Some(spec.nano_cpus),
            pids_limit: Some(spec.pids_limit),
            cap_drop: Some(spec.cap_drop.clone()),
            security_opt: Some(spec.security_opt.clone()),
            readonly_rootfs: Some(spec.read_only_rootfs),
            tmpfs: Some(spec.tmpfs.clone()),
            network_mode: spec.network_disabled.then(|| "none".to_string()),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            user: Some(spec.user.clone()),
            working_dir: Some(spec.working_dir.clone()),
            network_disabled: Some(spec.network_disabled),
            attach_stdin: Some(spec.open_stdin),
            open_stdin: Some(spec.open_stdin),
            stdin_once: Some(spec.open_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            labels: Some(HashMap::from([(
                MANAGED_LABEL.to_string(),
                "true".to_string(),
            )])),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Map a bollard error to the kind the runner acts on
fn classify(err: DockerError) -> BackendError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => BackendError::NotFound(message),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => BackendError::Api {
            status: status_code,
            message,
        },
        other => BackendError::Unavailable(other.to_string()),
    }
}

/// Exit code from the first item of a wait stream
fn exit_code_from_wait(
    item: Option<Result<ContainerWaitResponse, DockerError>>,
) -> Result<i64, BackendError> {
    match item {
        Some(Ok(response)) => Ok(response.status_code),
        // bollard reports non-zero exits as errors
        Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
        Some(Err(e)) => Err(classify(e)),
        None => Err(BackendError::Unavailable(
            "wait stream ended before the container exited".to_string(),
        )),
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        self.docker.ping().await.map_err(classify)?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(classify(e)),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, BackendError> {
        let config = Self::to_bollard_config(spec);
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(classify)?;

        for warning in &response.warnings {
            debug!("Docker warning for {}: {}", response.id, warning);
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), BackendError> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // The daemon answered but the runtime could not exec the command
            Err(DockerError::DockerResponseServerError {
                status_code,
                message,
            }) if status_code != 404 => {
                let exit_code = self
                    .inspect(id)
                    .await
                    .ok()
                    .and_then(|state| state.exit_code)
                    .filter(|code| *code != 0);
                Err(BackendError::ContainerFailed { message, exit_code })
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn write_stdin(&self, id: &str, data: &[u8]) -> Result<(), BackendError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stream: Some(true),
            ..Default::default()
        };
        let AttachContainerResults { mut input, .. } = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(classify)?;

        input
            .write_all(data)
            .await
            .map_err(|e| BackendError::Unavailable(format!("stdin write failed: {}", e)))?;
        input
            .shutdown()
            .await
            .map_err(|e| BackendError::Unavailable(format!("stdin close failed: {}", e)))?;
        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64, BackendError> {
        let mut stream = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        exit_code_from_wait(stream.next().await)
    }

    async fn logs(&self, id: &str) -> Result<ContainerLogs, BackendError> {
        let mut stream = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                tail: "all".to_string(),
                ..Default::default()
            }),
        );

        let mut logs = ContainerLogs::default();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(classify)? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    logs.stdout.extend_from_slice(&message)
                }
                LogOutput::StdErr { message } => logs.stderr.extend_from_slice(&message),
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(logs)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState, BackendError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(classify)?;

        let state = response.state.unwrap_or_default();
        Ok(ContainerState {
            oom_killed: state.oom_killed.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn kill(&self, id: &str) -> Result<(), BackendError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(classify)
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(classify)
    }
}
