//! Terminal tunnel: a raw byte bridge between a browser WebSocket and the
//! interactive shell of the project's container.
//!
//! The WebSocket handshake completes before any container work starts; the
//! tunnel goes `Connecting -> ContainerProvisioning -> Attached -> Closed`.
//! When either side ends, the container is force-removed.

use crate::container::{AttachedStream, ContainerHandle};
use crate::state::{AppState, TunnelState};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

/// WebSocket close reasons are limited to 123 bytes.
const MAX_CLOSE_REASON: usize = 123;

const SUPERSEDED_REASON: &str = "terminal replaced by a newer connection";

/// Run a terminal tunnel for `project_id` on an upgraded socket.
pub async fn run(socket: WebSocket, state: AppState, project_id: String) {
    let tunnel_id = state.sessions.open(&project_id).await;
    info!(project_id = %project_id, tunnel_id, "Terminal connected");

    if !state
        .sessions
        .transition(&project_id, tunnel_id, TunnelState::ContainerProvisioning)
        .await
    {
        info!(project_id = %project_id, tunnel_id, "Tunnel superseded before provisioning");
        close_with(socket, close_code::AWAY, SUPERSEDED_REASON).await;
        return;
    }

    let handle = match state.containers.ensure_container(&project_id).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(project_id = %project_id, error = %e, "Error while creating container");
            state.sessions.close(&project_id, tunnel_id).await;
            close_with(socket, close_code::ERROR, &e.to_string()).await;
            return;
        }
    };

    let attached = match state.containers.attach(&handle).await {
        Ok(attached) => attached,
        Err(e) => {
            error!(project_id = %project_id, container_id = %handle.id, error = %e, "Failed to attach to container");
            state.sessions.close(&project_id, tunnel_id).await;
            state.containers.remove_container(&handle).await;
            close_with(socket, close_code::ERROR, &e.to_string()).await;
            return;
        }
    };

    if !state
        .sessions
        .bind_container(&project_id, tunnel_id, handle.clone())
        .await
    {
        warn!(project_id = %project_id, tunnel_id, "Tunnel superseded during provisioning");
        drop(attached);
        state.containers.remove_container(&handle).await;
        close_with(socket, close_code::AWAY, SUPERSEDED_REASON).await;
        return;
    }
    info!(project_id = %project_id, container_id = %handle.id, "Terminal attached");

    bridge(socket, attached, &handle).await;

    state.sessions.close(&project_id, tunnel_id).await;
    state.containers.remove_container(&handle).await;
    info!(project_id = %project_id, tunnel_id, "Terminal closed");
}

/// Pump bytes both ways until one side ends.
async fn bridge(socket: WebSocket, attached: AttachedStream, handle: &ContainerHandle) {
    let AttachedStream {
        mut output,
        mut input,
    } = attached;
    let (mut sender, mut receiver) = socket.split();

    let to_browser = async {
        let mut sent = 0usize;
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(bytes) => {
                    sent += bytes.len();
                    if sender.send(Message::Binary(bytes.to_vec())).await.is_err() {
                        return sent;
                    }
                }
                Err(e) => {
                    warn!(container_id = %handle.id, error = %e, "Container stream error");
                    break;
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        sent
    };

    let to_container = async {
        let mut received = 0usize;
        while let Some(msg) = receiver.next().await {
            let bytes = match msg {
                Ok(Message::Binary(data)) => data,
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(e) => {
                    warn!(container_id = %handle.id, error = %e, "Terminal socket receive error");
                    break;
                }
            };
            received += bytes.len();
            if let Err(e) = write_input(&mut input, &bytes).await {
                warn!(container_id = %handle.id, error = %e, "Failed to write to container");
                break;
            }
        }
        received
    };

    tokio::select! {
        sent = to_browser => {
            info!(container_id = %handle.id, bytes_out = sent, "Container stream ended");
        }
        received = to_container => {
            info!(container_id = %handle.id, bytes_in = received, "Browser disconnected");
        }
    }
}

async fn write_input(
    input: &mut crate::container::InputSink,
    bytes: &[u8],
) -> std::io::Result<()> {
    input.write_all(bytes).await?;
    input.flush().await
}

/// Tell the browser why the terminal is going away.
async fn close_with(mut socket: WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: truncate_reason(reason).into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        warn!(error = %e, "Failed to send close frame");
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_fits_frame_limit() {
        assert_eq!(truncate_reason("short"), "short");

        let long = "é".repeat(100);
        let cut = truncate_reason(&long);
        assert!(cut.len() <= MAX_CLOSE_REASON);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
