//! Docker-backed sandbox provider.
//!
//! Each sandbox is one container kept alive by a `sleep` process; commands
//! run as execs inside it and dev-server ports are published to ephemeral
//! host ports, from which the externally reachable URL is derived.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, RemoveContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ExecOutput, SandboxError, SandboxHandle, SandboxProvider};
use crate::config::SandboxConfig;

/// Provisions sandboxes as Docker containers.
pub struct DockerProvider {
    docker: Docker,
    config: SandboxConfig,
}

impl DockerProvider {
    /// Connects to the local Docker daemon.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::unavailable(format!("cannot connect to Docker: {e}")))?;
        Ok(Self { docker, config })
    }

    fn container_config(&self) -> ContainerConfig<String> {
        // Keep the container alive; all work happens via execs.
        let exposed_ports: HashMap<String, HashMap<(), ()>> = self
            .config
            .candidate_ports
            .iter()
            .map(|p| (format!("{p}/tcp"), HashMap::new()))
            .collect();

        ContainerConfig {
            image: Some(self.config.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(self.config.workdir.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(bollard::service::HostConfig {
                publish_all_ports: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    async fn create(&self) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        self.docker
            .ping()
            .await
            .map_err(|e| SandboxError::unavailable(format!("cannot ping Docker daemon: {e}")))?;

        let name = format!("drydock-{}", short_id());

        debug!(container = %name, image = %self.config.image, "Creating sandbox container");
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                self.container_config(),
            )
            .await
            .map_err(|e| SandboxError::provision_failed(format!("create container: {e}")))?;

        self.docker
            .start_container::<String>(&name, None)
            .await
            .map_err(|e| SandboxError::provision_failed(format!("start container: {e}")))?;

        info!(sandbox_id = %name, "Sandbox provisioned");
        Ok(Box::new(DockerSandbox {
            docker: self.docker.clone(),
            id: name,
            public_host: self.config.public_host.clone(),
        }))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let inspect = self
            .docker
            .inspect_container(sandbox_id, None)
            .await
            .map_err(|e| map_inspect_error(sandbox_id, &e))?;

        let running = inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false);
        if !running {
            return Err(SandboxError::stale_handle(sandbox_id));
        }

        Ok(Box::new(DockerSandbox {
            docker: self.docker.clone(),
            id: sandbox_id.to_string(),
            public_host: self.config.public_host.clone(),
        }))
    }
}

/// A handle to one running sandbox container.
pub struct DockerSandbox {
    docker: Docker,
    id: String,
    public_host: String,
}

#[async_trait]
impl SandboxHandle for DockerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::exec_failed(format!("create exec: {e}")))?;

        let collect = async {
            let mut stdout = String::new();
            let mut stderr = String::new();

            if let StartExecResults::Attached {
                output: mut stream, ..
            } = self
                .docker
                .start_exec(&exec.id, None)
                .await
                .map_err(|e| SandboxError::exec_failed(format!("start exec: {e}")))?
            {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Err(e) => {
                            return Err(SandboxError::transport(format!(
                                "reading exec output: {e}"
                            )));
                        }
                        _ => {}
                    }
                }
            }
            Ok((stdout, stderr))
        };

        let (stdout, stderr) = tokio::time::timeout(timeout, collect)
            .await
            .map_err(|_| SandboxError::timeout(timeout))??;

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::exec_failed(format!("inspect exec: {e}")))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn exec_detached(&self, command: &str) -> Result<(), SandboxError> {
        let exec = self
            .docker
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
                    attach_stdout: Some(false),
                    attach_stderr: Some(false),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::exec_failed(format!("create exec: {e}")))?;

        self.docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::exec_failed(format!("start detached exec: {e}")))?;

        Ok(())
    }

    async fn expose_port(&self, port: u16) -> Result<Option<String>, SandboxError> {
        let inspect = self
            .docker
            .inspect_container(&self.id, None)
            .await
            .map_err(|e| map_inspect_error(&self.id, &e))?;

        let host_port = inspect
            .network_settings
            .and_then(|ns| ns.ports)
            .and_then(|ports| ports.get(&format!("{port}/tcp")).cloned())
            .flatten()
            .and_then(|bindings| bindings.into_iter().next())
            .and_then(|binding| binding.host_port);

        Ok(host_port.map(|hp| format!("http://{}:{hp}", self.public_host)))
    }

    async fn close(&self) -> Result<(), SandboxError> {
        debug!(sandbox_id = %self.id, "Removing sandbox container");
        let result = self
            .docker
            .remove_container(
                &self.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            // Already gone counts as closed.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                warn!(sandbox_id = %self.id, "Container already removed");
                Ok(())
            }
            Err(e) => Err(SandboxError::transport(format!("remove container: {e}"))),
        }
    }
}

fn map_inspect_error(sandbox_id: &str, err: &bollard::errors::Error) -> SandboxError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => SandboxError::stale_handle(sandbox_id),
        other => SandboxError::transport(format!("inspect container: {other}")),
    }
}

/// Short unique suffix for container names.
fn short_id() -> String {
    uuid::Uuid::new_v4()
        .to_string()
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}
