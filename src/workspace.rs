//! File access inside a project workspace.
//!
//! The same directory is bind-mounted into the project's container, so paths
//! are always interpreted relative to the workspace root and never allowed to
//! leave it, including through symlinks created from inside the container.

use crate::error::FileAccessError;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// A project's on-disk workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build the host path for a workspace-relative path.
    ///
    /// A leading `/` is ignored; `..` and other non-normal components are
    /// rejected outright.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, FileAccessError> {
        let relative = relative.trim_start_matches('/');
        let mut result = self.root.clone();

        for component in Path::new(relative).components() {
            match component {
                Component::Normal(name) => {
                    if name.to_string_lossy().contains('\0') {
                        return Err(FileAccessError::PathTraversal);
                    }
                    result.push(name);
                }
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    warn!(path = relative, "Rejected path outside workspace");
                    return Err(FileAccessError::PathTraversal);
                }
            }
        }
        Ok(result)
    }

    /// Resolve and make sure symlinks do not point outside the workspace.
    async fn resolve_verified(&self, relative: &str) -> Result<PathBuf, FileAccessError> {
        let path = self.resolve(relative)?;
        let root = tokio::fs::canonicalize(&self.root).await?;

        // Check the deepest existing ancestor. Components below it must not
        // exist at all: a dangling link would be followed on write.
        let mut ancestor = path.as_path();
        loop {
            match tokio::fs::canonicalize(ancestor).await {
                Ok(canonical) => {
                    if !canonical.starts_with(&root) {
                        warn!(path = relative, resolved = %canonical.display(), "Symlink escapes workspace");
                        return Err(FileAccessError::PathTraversal);
                    }
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if let Ok(meta) = tokio::fs::symlink_metadata(ancestor).await {
                        if meta.file_type().is_symlink() {
                            let target = tokio::fs::read_link(ancestor).await.ok();
                            warn!(path = relative, target = ?target, "Dangling symlink in workspace path");
                            return Err(FileAccessError::PathTraversal);
                        }
                    }
                    match ancestor.parent() {
                        Some(parent) if parent.starts_with(&self.root) => ancestor = parent,
                        _ => return Ok(path),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read a UTF-8 text file.
    pub async fn read_file(&self, relative: &str) -> Result<String, FileAccessError> {
        let path = self.resolve_verified(relative).await?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FileAccessError::NotFound(relative.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(FileAccessError::NotAFile(relative.to_string()));
        }

        let bytes = tokio::fs::read(&path).await?;
        debug!(path = relative, bytes = bytes.len(), "Read file");
        String::from_utf8(bytes).map_err(|_| FileAccessError::NotUtf8(relative.to_string()))
    }

    /// Overwrite a file with `data`, creating it and its parent directories
    /// if needed.
    pub async fn write_file(&self, relative: &str, data: &str) -> Result<(), FileAccessError> {
        let path = self.resolve_verified(relative).await?;
        if path == self.root {
            return Err(FileAccessError::NotAFile(relative.to_string()));
        }

        if let Ok(metadata) = tokio::fs::metadata(&path).await {
            if metadata.is_dir() {
                return Err(FileAccessError::NotAFile(relative.to_string()));
            }
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, data.as_bytes()).await?;
        debug!(path = relative, bytes = data.len(), "Wrote file");
        Ok(())
    }
}

/// Text after the last `.` of the file name, or an empty string.
pub fn extension_of(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_string(),
        None => String::new(),
    }
}
