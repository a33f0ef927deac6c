//! Container lifecycle management.
//!
//! Every project owns at most one sandbox container, named after the project
//! identifier. [`ContainerManager::ensure_container`] always replaces a stale
//! container of the same name with a fresh one rather than reattaching to it.

use crate::config::SandboxConfig;
use crate::error::ContainerError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWrite;
use tracing::{debug, error, info, warn};

/// Longest accepted project identifier.
pub const MAX_PROJECT_ID_LEN: usize = 128;

/// Output side of an attached container: raw chunks of the shell's tty.
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<Bytes, ContainerError>> + Send>>;

/// Input side of an attached container: bytes written land on the shell's stdin.
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// A live attachment to a container's interactive stream.
pub struct AttachedStream {
    pub output: OutputStream,
    pub input: InputSink,
}

/// Container as returned by a name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Name without the runtime's leading `/`.
    pub name: String,
}

/// Container details as returned by inspect.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Exposed port key (`5173/tcp`) -> bound host port, if any.
    pub ports: HashMap<String, Option<u16>>,
}

/// Everything needed to create a sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// `host:container` bind mounts.
    pub binds: Vec<String>,
    pub exposed_ports: Vec<String>,
    /// Exposed port key -> requested host port; `0` lets the runtime pick.
    pub port_bindings: HashMap<String, u16>,
    pub tty: bool,
    pub user: String,
    pub working_dir: String,
}

impl ContainerSpec {
    /// Spec for a project's sandbox: workspace bind-mounted at the app dir,
    /// dev-server port exposed on a runtime-assigned host port, interactive
    /// shell with a tty.
    pub fn for_project(config: &SandboxConfig, project_id: &str) -> Self {
        let port_key = config.exposed_port_key();
        Self {
            image: config.image.clone(),
            cmd: vec![config.shell.clone()],
            env: config.env.clone(),
            binds: vec![config.bind_mount(project_id)],
            exposed_ports: vec![port_key.clone()],
            port_bindings: HashMap::from([(port_key, 0)]),
            tty: true,
            user: config.user.clone(),
            working_dir: config.app_dir.clone(),
        }
    }
}

/// Reference to a created container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// The operations the server needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Containers (running or not) whose name matches exactly.
    async fn list_by_name(&self, name: &str) -> Result<Vec<ContainerSummary>, ContainerError>;

    /// Look up a container by id or name.
    async fn inspect(&self, id: &str) -> Result<ContainerInfo, ContainerError>;

    /// Remove a container. Returns `NotFound` if it does not exist.
    async fn remove(&self, id: &str, force: bool) -> Result<(), ContainerError>;

    /// Create a container and return its id.
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String, ContainerError>;

    async fn start(&self, id: &str) -> Result<(), ContainerError>;

    /// Attach to the container's stdin and tty output.
    async fn attach(&self, id: &str) -> Result<AttachedStream, ContainerError>;
}

/// Check that a project identifier is usable as a container name and as a
/// single directory name.
pub fn validate_project_id(id: &str) -> Result<(), ContainerError> {
    let invalid = || ContainerError::InvalidName(id.to_string());

    if id.is_empty() || id.len() > MAX_PROJECT_ID_LEN {
        return Err(invalid());
    }
    let mut chars = id.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid());
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(invalid());
    }
    Ok(())
}

/// Finds, creates, starts and removes project containers.
#[derive(Clone)]
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
    /// One provisioning lock per project id.
    provision_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        Self {
            runtime,
            config,
            provision_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn provision_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .provision_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Guarantee a fresh running container for `project_id`.
    ///
    /// Any existing container with the same name is force-removed first, so
    /// at most one container per project exists once this returns. Calls for
    /// the same project run one at a time.
    pub async fn ensure_container(
        &self,
        project_id: &str,
    ) -> Result<ContainerHandle, ContainerError> {
        validate_project_id(project_id)?;

        let lock = self.provision_lock(project_id);
        let _guard = lock.lock().await;

        let workspace = self.config.workspace_dir(project_id);
        if !tokio::fs::try_exists(&workspace).await.unwrap_or(false) {
            return Err(ContainerError::WorkspaceMissing(workspace));
        }

        let existing = self.runtime.list_by_name(project_id).await?;
        for stale in existing.iter().filter(|c| c.name == project_id) {
            match self.runtime.remove(&stale.id, true).await {
                Ok(()) => info!(project_id, container_id = %stale.id, "Removed stale container"),
                Err(ContainerError::NotFound(_)) => {
                    debug!(project_id, container_id = %stale.id, "Stale container already gone")
                }
                Err(e) => return Err(e),
            }
        }

        let spec = ContainerSpec::for_project(&self.config, project_id);
        let id = self.runtime.create(project_id, &spec).await?;
        info!(project_id, container_id = %id, image = %spec.image, "Container created");

        if let Err(e) = self.runtime.start(&id).await {
            error!(project_id, container_id = %id, error = %e, "Container failed to start");
            if let Err(remove_err) = self.runtime.remove(&id, true).await {
                warn!(container_id = %id, error = %remove_err, "Failed to remove unstarted container");
            }
            return Err(e);
        }
        info!(project_id, container_id = %id, "Container started");

        Ok(ContainerHandle {
            id,
            name: project_id.to_string(),
        })
    }

    /// Force-remove a container. Best-effort: failures are logged, never returned.
    pub async fn remove_container(&self, handle: &ContainerHandle) {
        match self.runtime.remove(&handle.id, true).await {
            Ok(()) => info!(project_id = %handle.name, container_id = %handle.id, "Container removed"),
            Err(ContainerError::NotFound(_)) => {
                debug!(container_id = %handle.id, "Container already removed")
            }
            Err(e) => {
                warn!(container_id = %handle.id, error = %e, "Error while removing container")
            }
        }
    }

    /// Host port currently bound to the dev-server port of the named container.
    pub async fn host_port(&self, container_name: &str) -> Result<u16, ContainerError> {
        validate_project_id(container_name)?;
        let info = self.runtime.inspect(container_name).await?;
        let key = self.config.exposed_port_key();
        match info.ports.get(&key) {
            Some(Some(port)) if info.running && *port > 0 => Ok(*port),
            _ => Err(ContainerError::PortNotBound {
                container: container_name.to_string(),
                port: self.config.dev_server_port,
            }),
        }
    }

    pub async fn attach(&self, handle: &ContainerHandle) -> Result<AttachedStream, ContainerError> {
        self.runtime.attach(&handle.id).await
    }
}
