//! Editor channel: file read/write and port lookup over a WebSocket.
//!
//! Frames are JSON event envelopes, `{"event": "<name>", "data": {...}}`.
//! Messages on one connection are handled strictly one after another, so a
//! connection never observes its own writes out of order. Nothing is
//! coordinated across connections: two tabs writing the same file race and
//! the last write wins.

use crate::container::{validate_project_id, ContainerManager};
use crate::error::{AppError, FileAccessError};
use crate::workspace::{extension_of, Workspace};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// The only namespace the editor layer accepts.
pub const EDITOR_NAMESPACE: &str = "/editor";

/// Messages sent by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    ReadFile {
        #[serde(rename = "pathToFileOrFolder")]
        path: String,
    },
    WriteFile {
        data: String,
        #[serde(rename = "pathToFileOrFolder")]
        path: String,
    },
    GetPort {
        #[serde(rename = "containerName")]
        container_name: String,
    },
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::ReadFile { .. } => "readFile",
            ClientMessage::WriteFile { .. } => "writeFile",
            ClientMessage::GetPort { .. } => "getPort",
        }
    }
}

/// Messages sent to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    ReadFileSuccess {
        path: String,
        data: String,
        extension: String,
    },
    WriteFileSuccess {
        path: String,
    },
    GetPortSuccess {
        port: u16,
    },
    /// The inbound `event` failed.
    Error {
        event: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl ServerMessage {
    fn file_error(event: &str, path: &str, err: &FileAccessError) -> Self {
        ServerMessage::Error {
            event: event.to_string(),
            message: err.to_string(),
            path: Some(path.to_string()),
        }
    }
}

/// Check an editor connection request and return its project id.
pub fn accept(namespace: &str, project_id: Option<String>) -> Result<String, AppError> {
    if namespace != EDITOR_NAMESPACE {
        return Err(AppError::UnknownNamespace(namespace.to_string()));
    }
    let project_id = project_id
        .ok_or_else(|| AppError::BadRequest("missing projectId query parameter".into()))?;
    validate_project_id(&project_id)?;
    Ok(project_id)
}

/// One editor connection, bound to a project at connect time.
pub struct EditorSession {
    project_id: String,
    workspace: Workspace,
    containers: ContainerManager,
}

impl EditorSession {
    pub fn new(project_id: String, workspace: Workspace, containers: ContainerManager) -> Self {
        Self {
            project_id,
            workspace,
            containers,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Parse and handle one text frame.
    pub async fn handle_text(&self, text: &str) -> Vec<ServerMessage> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                warn!(project_id = %self.project_id, error = %e, "Unparseable editor message");
                vec![ServerMessage::Error {
                    event: "unknown".to_string(),
                    message: e.to_string(),
                    path: None,
                }]
            }
        }
    }

    /// Handle one message and return the replies in the order they are sent.
    pub async fn handle(&self, message: ClientMessage) -> Vec<ServerMessage> {
        let event = message.event_name();
        debug!(project_id = %self.project_id, event, "Editor message");

        match message {
            ClientMessage::ReadFile { path } => vec![self.read(event, path).await],
            ClientMessage::WriteFile { data, path } => {
                if let Err(e) = self.workspace.write_file(&path, &data).await {
                    warn!(project_id = %self.project_id, path = %path, error = %e, "writeFile failed");
                    return vec![ServerMessage::file_error(event, &path, &e)];
                }
                // Echo back what is actually on disk rather than the client's buffer.
                let echo = self.read("readFile", path.clone()).await;
                vec![ServerMessage::WriteFileSuccess { path }, echo]
            }
            ClientMessage::GetPort { container_name } => {
                match self.containers.host_port(&container_name).await {
                    Ok(port) => vec![ServerMessage::GetPortSuccess { port }],
                    Err(e) => {
                        warn!(project_id = %self.project_id, container = %container_name, error = %e, "getPort failed");
                        vec![ServerMessage::Error {
                            event: event.to_string(),
                            message: e.to_string(),
                            path: None,
                        }]
                    }
                }
            }
        }
    }

    async fn read(&self, event: &str, path: String) -> ServerMessage {
        match self.workspace.read_file(&path).await {
            Ok(data) => ServerMessage::ReadFileSuccess {
                extension: extension_of(&path),
                path,
                data,
            },
            Err(e) => {
                warn!(project_id = %self.project_id, path = %path, error = %e, "readFile failed");
                ServerMessage::file_error(event, &path, &e)
            }
        }
    }
}

/// Serve an upgraded editor socket until the client goes away.
pub async fn run(socket: WebSocket, session: EditorSession) {
    let (mut sender, mut receiver) = socket.split();
    let project_id = session.project_id().to_string();
    info!(project_id = %project_id, "Editor connected");

    let mut handled = 0usize;
    'conn: while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!(project_id = %project_id, "Ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Editor socket receive error");
                break;
            }
        };

        handled += 1;
        for reply in session.handle_text(&text).await {
            let frame = match serde_json::to_string(&reply) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(project_id = %project_id, error = %e, "Failed to encode reply");
                    continue;
                }
            };
            if sender.send(Message::Text(frame)).await.is_err() {
                warn!(project_id = %project_id, "Failed to send reply, closing");
                break 'conn;
            }
        }
    }

    info!(project_id = %project_id, messages = handled, "Editor disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_inbound_events() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "writeFile",
            "data": { "data": "hello", "pathToFileOrFolder": "src/a.js" }
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::WriteFile {
                data: "hello".into(),
                path: "src/a.js".into()
            }
        );

        let msg: ClientMessage = serde_json::from_value(json!({
            "event": "getPort",
            "data": { "containerName": "p1" }
        }))
        .unwrap();
        assert_eq!(msg.event_name(), "getPort");
    }

    #[test]
    fn encodes_outbound_events() {
        let value = serde_json::to_value(ServerMessage::ReadFileSuccess {
            path: "src/a.js".into(),
            data: "x".into(),
            extension: "js".into(),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "event": "readFileSuccess",
                "data": { "path": "src/a.js", "data": "x", "extension": "js" }
            })
        );

        let value = serde_json::to_value(ServerMessage::GetPortSuccess { port: 49153 }).unwrap();
        assert_eq!(value, json!({ "event": "getPortSuccess", "data": { "port": 49153 } }));
    }

    #[test]
    fn accept_checks_namespace_and_project() {
        assert_eq!(accept("/editor", Some("p1".into())).unwrap(), "p1");
        assert!(matches!(
            accept("/chat", Some("p1".into())),
            Err(AppError::UnknownNamespace(_))
        ));
        assert!(matches!(accept("/editor", None), Err(AppError::BadRequest(_))));
        assert!(matches!(
            accept("/editor", Some("../x".into())),
            Err(AppError::BadRequest(_))
        ));
    }
}
