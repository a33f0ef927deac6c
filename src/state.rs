//! Shared application state and the terminal session registry.

use crate::config::ServerConfig;
use crate::container::{ContainerHandle, ContainerManager, ContainerRuntime};
use crate::project::ProjectStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Lifecycle of a terminal tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Connecting,
    ContainerProvisioning,
    Attached,
    Closed,
}

/// A live terminal tunnel and the container it is bound to.
#[derive(Debug, Clone)]
pub struct TerminalSession {
    pub tunnel_id: u64,
    pub project_id: String,
    pub container: Option<ContainerHandle>,
    pub state: TunnelState,
    pub opened_at: Instant,
}

/// Project id -> the project's current terminal tunnel.
///
/// Every mutation names the tunnel it comes from, so a superseded tunnel
/// tearing down late cannot touch its successor's entry.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, TerminalSession>>,
    next_tunnel_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tunnel for `project_id`, replacing any previous one.
    pub async fn open(&self, project_id: &str) -> u64 {
        let tunnel_id = self.next_tunnel_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = TerminalSession {
            tunnel_id,
            project_id: project_id.to_string(),
            container: None,
            state: TunnelState::Connecting,
            opened_at: Instant::now(),
        };
        let previous = self
            .sessions
            .write()
            .await
            .insert(project_id.to_string(), session);
        if let Some(previous) = previous {
            info!(
                project_id,
                previous_tunnel = previous.tunnel_id,
                tunnel_id,
                "Terminal tunnel superseded"
            );
        }
        tunnel_id
    }

    /// Move a tunnel to `state`. Returns false if the tunnel is no longer current.
    pub async fn transition(&self, project_id: &str, tunnel_id: u64, state: TunnelState) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(project_id) {
            Some(session) if session.tunnel_id == tunnel_id => {
                debug!(project_id, tunnel_id, from = ?session.state, to = ?state, "Tunnel state change");
                session.state = state;
                true
            }
            _ => false,
        }
    }

    /// Record the container a tunnel is bound to and mark it attached.
    pub async fn bind_container(
        &self,
        project_id: &str,
        tunnel_id: u64,
        container: ContainerHandle,
    ) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(project_id) {
            Some(session) if session.tunnel_id == tunnel_id => {
                session.container = Some(container);
                session.state = TunnelState::Attached;
                true
            }
            _ => false,
        }
    }

    /// Drop a tunnel's entry if it is still the current one.
    pub async fn close(&self, project_id: &str, tunnel_id: u64) -> Option<TerminalSession> {
        let mut sessions = self.sessions.write().await;
        if sessions.get(project_id).map(|s| s.tunnel_id) != Some(tunnel_id) {
            return None;
        }
        sessions.remove(project_id).map(|mut s| {
            s.state = TunnelState::Closed;
            s
        })
    }

    pub async fn get(&self, project_id: &str) -> Option<TerminalSession> {
        self.sessions.read().await.get(project_id).cloned()
    }

    pub async fn list(&self) -> Vec<TerminalSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Remove and return every session.
    pub async fn drain(&self) -> Vec<TerminalSession> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub containers: ContainerManager,
    pub sessions: Arc<SessionRegistry>,
    pub projects: Arc<ProjectStore>,
}

impl AppState {
    pub fn new(config: ServerConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let containers = ContainerManager::new(runtime, config.sandbox.clone());
        let projects = ProjectStore::new(
            config.sandbox.projects_dir.clone(),
            config.scaffold_command.clone(),
        );
        Self {
            config: Arc::new(config),
            containers,
            sessions: Arc::new(SessionRegistry::new()),
            projects: Arc::new(projects),
        }
    }
}
