//! Error types for container provisioning, workspace file access and
//! project scaffolding.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::path::PathBuf;

/// Failures talking to the container runtime.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("invalid project identifier: {0:?}")]
    InvalidName(String),

    #[error("workspace directory does not exist: {}", .0.display())]
    WorkspaceMissing(PathBuf),

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("container {container} has no host binding for port {port}")]
    PortNotBound { container: String, port: u16 },

    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// Failures reading or writing a file inside a project workspace.
#[derive(Debug, thiserror::Error)]
pub enum FileAccessError {
    #[error("path escapes the project workspace")]
    PathTraversal,

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("file is not valid UTF-8: {0}")]
    NotUtf8(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures creating a project workspace.
#[derive(Debug, thiserror::Error)]
pub enum ScaffoldError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scaffold command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
}

/// Errors returned from the REST endpoints.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("no such namespace: {0}")]
    UnknownNamespace(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl From<ContainerError> for AppError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::InvalidName(_) => AppError::BadRequest(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::ProjectNotFound(_) | AppError::UnknownNamespace(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
