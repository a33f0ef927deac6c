//! Docker Engine implementation of [`ContainerRuntime`].

use crate::container::{
    AttachedStream, ContainerInfo, ContainerRuntime, ContainerSpec, ContainerSummary,
};
use crate::error::ContainerError;
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, ListContainersOptions, RemoveContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{HostConfig, PortBinding, PortMap};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Talks to the local Docker daemon over its default socket.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults().map_err(map_error)?;
        Ok(Self { docker })
    }

    /// Check the daemon is reachable.
    pub async fn ping(&self) -> Result<(), ContainerError> {
        self.docker.ping().await.map_err(map_error)?;
        Ok(())
    }
}

fn map_error(err: BollardError) -> ContainerError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => ContainerError::NotFound(message),
        other => ContainerError::Runtime(other.to_string()),
    }
}

/// Collapse a runtime port map into `port key -> first bound host port`.
fn host_ports(ports: PortMap) -> HashMap<String, Option<u16>> {
    ports
        .into_iter()
        .map(|(key, bindings)| {
            let host_port = bindings.unwrap_or_default().iter().find_map(|b| {
                b.host_port
                    .as_deref()
                    .and_then(|p| p.parse::<u16>().ok())
                    .filter(|p| *p > 0)
            });
            (key, host_port)
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_by_name(&self, name: &str) -> Result<Vec<ContainerSummary>, ContainerError> {
        let filters = HashMap::from([("name".to_string(), vec![name.to_string()])]);
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_error)?;

        // The engine's name filter matches substrings; keep exact names only.
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                c.names
                    .unwrap_or_default()
                    .iter()
                    .map(|n| n.trim_start_matches('/'))
                    .find(|n| *n == name)
                    .map(|n| ContainerSummary {
                        id,
                        name: n.to_string(),
                    })
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, ContainerError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_error)?;

        Ok(ContainerInfo {
            id: response.id.unwrap_or_default(),
            name: response
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            running: response.state.and_then(|s| s.running).unwrap_or(false),
            ports: response
                .network_settings
                .and_then(|n| n.ports)
                .map(host_ports)
                .unwrap_or_default(),
        })
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 409,
                message,
            }) if message.contains("already in progress") => {
                debug!(container_id = id, "Removal already in progress");
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }

    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|p| (p.clone(), HashMap::new()))
            .collect();

        let port_bindings: PortMap = spec
            .port_bindings
            .iter()
            .map(|(key, host_port)| {
                (
                    key.clone(),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host_port.to_string()),
                    }]),
                )
            })
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            tty: Some(spec.tty),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            user: Some(spec.user.clone()),
            working_dir: Some(spec.working_dir.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_error)?;
        for warning in &response.warnings {
            warn!(container = name, "{}", warning);
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(map_error)
    }

    async fn attach(&self, id: &str) -> Result<AttachedStream, ContainerError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            detach_keys: None,
        };
        let AttachContainerResults { output, input } = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(map_error)?;

        let output = output.map(|chunk| chunk.map(|log| log.into_bytes()).map_err(map_error));
        Ok(AttachedStream {
            output: Box::pin(output),
            input,
        })
    }
}
