//! Project workspaces: scaffolding, lifecycle state and directory trees.

use crate::error::ScaffoldError;
use crate::workspace::Workspace;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Directories listed in a tree but never descended into.
const OPAQUE_DIRS: &[&str] = &["node_modules", ".git"];

/// Keep at most this much scaffold stderr in error messages.
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    Uninitialized,
    Scaffolding,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// One entry of a workspace tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub name: String,
    /// Path relative to the workspace root.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

/// Tracks projects under the projects directory.
///
/// Only in-flight scaffolding is held in memory; a workspace directory
/// found on disk is a ready project.
pub struct ProjectStore {
    projects_dir: PathBuf,
    scaffold_command: String,
    states: RwLock<HashMap<String, ProjectState>>,
}

impl ProjectStore {
    pub fn new(projects_dir: PathBuf, scaffold_command: String) -> Self {
        Self {
            projects_dir,
            scaffold_command,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn workspace(&self, project_id: &str) -> Workspace {
        Workspace::new(self.projects_dir.join(project_id))
    }

    pub async fn state(&self, project_id: &str) -> ProjectState {
        if let Some(state) = self.states.read().await.get(project_id) {
            return *state;
        }
        let dir = self.projects_dir.join(project_id);
        if tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            ProjectState::Ready
        } else {
            ProjectState::Uninitialized
        }
    }

    /// Create a new workspace and run the scaffold command in it.
    ///
    /// Returns the new project id once the workspace is ready.
    pub async fn create(&self) -> Result<String, ScaffoldError> {
        let project_id = uuid::Uuid::new_v4().to_string();
        let dir = self.projects_dir.join(&project_id);

        tokio::fs::create_dir_all(&self.projects_dir).await?;
        tokio::fs::create_dir(&dir).await?;
        self.states
            .write()
            .await
            .insert(project_id.clone(), ProjectState::Scaffolding);
        info!(project_id = %project_id, command = %self.scaffold_command, "Scaffolding project");

        let result = self.scaffold(&dir).await;
        self.states.write().await.remove(&project_id);

        match result {
            Ok(()) => {
                info!(project_id = %project_id, "Project ready");
                Ok(project_id)
            }
            Err(e) => {
                error!(project_id = %project_id, error = %e, "Scaffolding failed");
                if let Err(rm) = tokio::fs::remove_dir_all(&dir).await {
                    warn!(project_id = %project_id, error = %rm, "Failed to clean up workspace");
                }
                Err(e)
            }
        }
    }

    async fn scaffold(&self, dir: &Path) -> Result<(), ScaffoldError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.scaffold_command)
            .current_dir(dir)
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let start = stderr
            .char_indices()
            .map(|(i, _)| i)
            .find(|i| stderr.len() - i <= STDERR_TAIL_BYTES)
            .unwrap_or(stderr.len());
        Err(ScaffoldError::CommandFailed {
            status: output.status.to_string(),
            stderr: stderr[start..].trim().to_string(),
        })
    }

    /// Directory tree of a project's workspace.
    pub async fn tree(&self, project_id: &str) -> std::io::Result<TreeNode> {
        let root = self.projects_dir.join(project_id);
        let name = project_id.to_string();
        tokio::task::spawn_blocking(move || {
            let children = walk_dir(&root, &root)?;
            Ok(TreeNode {
                name,
                path: String::new(),
                kind: NodeKind::Directory,
                children: Some(children),
            })
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

fn walk_dir(root: &Path, dir: &Path) -> std::io::Result<Vec<TreeNode>> {
    let mut nodes = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let relative = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        // file_type() does not follow links, so symlinks show up as files.
        let node = if entry.file_type()?.is_dir() {
            let children = if OPAQUE_DIRS.contains(&name.as_str()) {
                None
            } else {
                Some(walk_dir(root, &path)?)
            };
            TreeNode {
                name,
                path: relative,
                kind: NodeKind::Directory,
                children,
            }
        } else {
            TreeNode {
                name,
                path: relative,
                kind: NodeKind::File,
                children: None,
            }
        };
        nodes.push(node);
    }

    nodes.sort_by(|a, b| match (a.kind, b.kind) {
        (NodeKind::Directory, NodeKind::File) => std::cmp::Ordering::Less,
        (NodeKind::File, NodeKind::Directory) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
    Ok(nodes)
}
