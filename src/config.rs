//! Runtime configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_IMAGE: &str = "sandbox";
pub const DEFAULT_APP_DIR: &str = "/home/sandbox/app";
pub const DEFAULT_DEV_SERVER_PORT: u16 = 5173;
pub const DEFAULT_USER: &str = "sandbox";
pub const DEFAULT_SHELL: &str = "/bin/bash";
pub const DEFAULT_SCAFFOLD_COMMAND: &str = "npx --yes create-vite@latest sandbox --template react";

/// Parameters for every sandbox container the server creates.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Image all sandboxes are created from.
    pub image: String,
    /// Absolute host directory holding one workspace per project.
    pub projects_dir: PathBuf,
    /// Path the workspace is bind-mounted at inside the container.
    pub app_dir: String,
    /// Dev-server port exposed by the container.
    pub dev_server_port: u16,
    /// Non-root user the shell runs as.
    pub user: String,
    /// Interactive shell used as the container command.
    pub shell: String,
    pub env: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            projects_dir: PathBuf::from("projects"),
            app_dir: DEFAULT_APP_DIR.to_string(),
            dev_server_port: DEFAULT_DEV_SERVER_PORT,
            user: DEFAULT_USER.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            env: vec!["HOST=0.0.0.0".to_string()],
        }
    }
}

impl SandboxConfig {
    /// Host directory for a project's workspace.
    pub fn workspace_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir.join(project_id)
    }

    /// Bind mount spec (`host:container`) for a project's workspace.
    pub fn bind_mount(&self, project_id: &str) -> String {
        format!(
            "{}:{}",
            self.workspace_dir(project_id).display(),
            self.app_dir
        )
    }

    /// Runtime key of the exposed dev-server port, e.g. `5173/tcp`.
    pub fn exposed_port_key(&self) -> String {
        format!("{}/tcp", self.dev_server_port)
    }
}

/// Full server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub sandbox: SandboxConfig,
    /// Shell command run inside a fresh workspace to generate the project.
    pub scaffold_command: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            sandbox: SandboxConfig::default(),
            scaffold_command: DEFAULT_SCAFFOLD_COMMAND.to_string(),
        }
    }
}

/// Create the projects directory if needed and return its absolute path.
///
/// Bind mounts need absolute host paths, so relative paths are resolved
/// against the current working directory.
pub fn prepare_projects_dir(dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    dir.canonicalize()
}
