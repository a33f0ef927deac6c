//! Shared fixtures: an in-memory container runtime and a server on a
//! loopback port.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use cloudide::config::{SandboxConfig, ServerConfig};
use cloudide::container::{
    AttachedStream, ContainerInfo, ContainerRuntime, ContainerSpec, ContainerSummary,
};
use cloudide::error::ContainerError;
use cloudide::http_server;
use cloudide::state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub const FIRST_HOST_PORT: u16 = 49152;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub spec: ContainerSpec,
    pub running: bool,
    pub host_port: u16,
    /// Ends every attached output stream when the container goes away.
    pub killed: Arc<watch::Sender<bool>>,
}

#[derive(Default)]
struct Inner {
    containers: Vec<FakeContainer>,
    removed: Vec<String>,
    created: usize,
}

/// Container runtime that keeps containers in memory.
///
/// Attaching gives a loopback tty: every byte written to the input comes
/// back on the output. Removing a container ends its output streams.
#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
    pub fail_create: AtomicBool,
    pub fail_start: AtomicBool,
    /// Sleep before every list, create, start and remove call.
    pub latency_ms: AtomicU64,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A runtime whose calls take a while, so concurrent callers interleave.
    pub fn slow(latency: Duration) -> Arc<Self> {
        let runtime = Self::default();
        runtime
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
        Arc::new(runtime)
    }

    async fn pause(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Create a container without starting it.
    pub fn add_stopped(&self, name: &str, spec: ContainerSpec) -> String {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.created;
        inner.created += 1;
        let id = format!("fake{n:08x}");
        inner.containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            spec,
            running: false,
            host_port: FIRST_HOST_PORT + n as u16,
            killed: Arc::new(watch::channel(false).0),
        });
        id
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.inner.lock().unwrap().containers.clone()
    }

    pub fn named(&self, name: &str) -> Vec<FakeContainer> {
        self.containers()
            .into_iter()
            .filter(|c| c.name == name)
            .collect()
    }

    pub fn removed(&self) -> Vec<String> {
        self.inner.lock().unwrap().removed.clone()
    }

    pub fn created_count(&self) -> usize {
        self.inner.lock().unwrap().created
    }

    fn find(&self, id_or_name: &str) -> Option<FakeContainer> {
        self.inner
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
            .cloned()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_by_name(&self, name: &str) -> Result<Vec<ContainerSummary>, ContainerError> {
        self.pause().await;
        Ok(self
            .named(name)
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id,
                name: c.name,
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, ContainerError> {
        let container = self
            .find(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        let ports = container
            .spec
            .exposed_ports
            .iter()
            .map(|key| (key.clone(), Some(container.host_port)))
            .collect();
        Ok(ContainerInfo {
            id: container.id,
            name: container.name,
            running: container.running,
            ports,
        })
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<(), ContainerError> {
        self.pause().await;
        let mut inner = self.inner.lock().unwrap();
        let Some(index) = inner.containers.iter().position(|c| c.id == id) else {
            return Err(ContainerError::NotFound(id.to_string()));
        };
        let container = inner.containers.remove(index);
        container.killed.send_replace(true);
        inner.removed.push(id.to_string());
        Ok(())
    }

    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String, ContainerError> {
        self.pause().await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ContainerError::Runtime("image not found".to_string()));
        }
        if !self.named(name).is_empty() {
            return Err(ContainerError::Runtime(format!(
                "Conflict. The container name \"/{name}\" is already in use"
            )));
        }
        Ok(self.add_stopped(name, spec.clone()))
    }

    async fn start(&self, id: &str) -> Result<(), ContainerError> {
        self.pause().await;
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ContainerError::Runtime("port is already allocated".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        let container = inner
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn attach(&self, id: &str) -> Result<AttachedStream, ContainerError> {
        let container = self
            .find(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        let killed = container.killed.subscribe();
        let (input, tty) = tokio::io::duplex(4096);
        let output = futures_util::stream::unfold((tty, killed), |(mut tty, mut killed)| async move {
            let mut buf = vec![0u8; 1024];
            let read = tokio::select! {
                read = tty.read(&mut buf) => read,
                _ = wait_killed(&mut killed) => return None,
            };
            match read {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), (tty, killed)))
                }
                Err(e) => Some((
                    Err(ContainerError::Runtime(e.to_string())),
                    (tty, killed),
                )),
            }
        });
        Ok(AttachedStream {
            output: Box::pin(output),
            input: Box::pin(input),
        })
    }
}

async fn wait_killed(killed: &mut watch::Receiver<bool>) {
    loop {
        let is_killed = *killed.borrow_and_update();
        if is_killed {
            return;
        }
        if killed.changed().await.is_err() {
            // Sender dropped without a removal: the stream lives on.
            std::future::pending::<()>().await;
        }
    }
}

pub const SCAFFOLD_COMMAND: &str =
    "mkdir -p src && printf 'export default 1\\n' > src/App.jsx && printf '{}' > package.json";

pub fn test_config(projects_dir: PathBuf) -> ServerConfig {
    ServerConfig {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        sandbox: SandboxConfig {
            projects_dir,
            ..Default::default()
        },
        scaffold_command: SCAFFOLD_COMMAND.to_string(),
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub runtime: Arc<FakeRuntime>,
    pub projects: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<std::io::Result<()>>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_runtime(FakeRuntime::new()).await
    }

    pub async fn with_runtime(runtime: Arc<FakeRuntime>) -> Self {
        let projects = TempDir::new().unwrap();
        let projects_dir = projects.path().canonicalize().unwrap();
        let state = AppState::new(test_config(projects_dir), runtime.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(http_server::serve(listener, state.clone(), async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            state,
            runtime,
            projects,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Create an empty workspace directory without scaffolding.
    pub fn add_project(&self, id: &str) -> PathBuf {
        let dir = self.state.config.sandbox.projects_dir.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Signal shutdown and wait for the server to finish cleanup.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("server did not shut down")
                .unwrap()
                .unwrap();
        }
    }
}

/// Poll `check` until it holds or a couple of seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
