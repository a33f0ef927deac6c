//! HTTP server implementation using Axum.

use crate::editor::{self, EditorSession};
use crate::error::AppError;
use crate::project::ProjectState;
use crate::state::{AppState, TunnelState};
use crate::terminal;
use crate::upgrade::{self, UpgradeRoute};
use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Serialize)]
struct SessionInfo {
    project_id: String,
    container_id: Option<String>,
    state: TunnelState,
    age_secs: u64,
}

#[derive(Serialize)]
struct ProjectInfo {
    id: String,
    state: ProjectState,
}

/// Build the application router.
///
/// Every WebSocket upgrade falls through to [`upgrade_handler`], which
/// decides between the terminal tunnel and the editor channel.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ping", get(ping))
        .route("/api/v1/projects", post(create_project))
        .route("/api/v1/projects/:id", get(get_project))
        .route("/api/v1/projects/:id/tree", get(project_tree))
        .route("/api/v1/sessions", get(list_sessions))
        .fallback(upgrade_handler)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C or SIGTERM.
pub async fn run_server(state: AppState) -> std::io::Result<()> {
    let addr = state.config.addr;
    let listener = TcpListener::bind(addr).await?;
    info!("Starting HTTP server on {}", addr);
    serve(listener, state, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves, then remove
/// every container that still has a live terminal.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown)
        .await?;
    cleanup_sessions(&state).await;
    Ok(())
}

async fn cleanup_sessions(state: &AppState) {
    for session in state.sessions.drain().await {
        if let Some(container) = session.container {
            info!(project_id = %session.project_id, "Removing container on shutdown");
            state.containers.remove_container(&container).await;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

async fn health() -> &'static str {
    "OK"
}

async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "msg": "pong" }))
}

async fn create_project(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let project_id = state
        .projects
        .create()
        .await
        .map_err(|_| AppError::Internal("Project creation failed".into()))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "msg": "Project created successfully",
            "data": project_id,
        })),
    ))
}

async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectInfo>, AppError> {
    crate::container::validate_project_id(&id)?;
    let project_state = state.projects.state(&id).await;
    Ok(Json(ProjectInfo {
        id,
        state: project_state,
    }))
}

async fn project_tree(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    crate::container::validate_project_id(&id)?;
    if state.projects.state(&id).await == ProjectState::Uninitialized {
        return Err(AppError::ProjectNotFound(id));
    }

    let tree = state.projects.tree(&id).await.map_err(|e| {
        error!(project_id = %id, error = %e, "Failed to walk project tree");
        AppError::Internal("Can't fetch project tree".into())
    })?;

    Ok(Json(json!({
        "msg": "Fetched project tree",
        "data": tree,
    })))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    let now = Instant::now();
    let list = state
        .sessions
        .list()
        .await
        .into_iter()
        .map(|s| SessionInfo {
            project_id: s.project_id,
            container_id: s.container.map(|c| c.id),
            state: s.state,
            age_secs: now.duration_since(s.opened_at).as_secs(),
        })
        .collect();
    Json(list)
}

/// Dispatch WebSocket upgrades by path; anything else is a 404.
async fn upgrade_handler(
    State(state): State<AppState>,
    ws: Option<WebSocketUpgrade>,
    uri: Uri,
) -> Response {
    let Some(ws) = ws else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response();
    };

    match upgrade::classify(&uri) {
        Err(e) => e.into_response(),
        Ok(UpgradeRoute::Terminal { project_id }) => {
            info!(project_id = %project_id, "Terminal upgrade requested");
            ws.on_upgrade(move |socket| terminal::run(socket, state, project_id))
        }
        Ok(UpgradeRoute::Editor {
            namespace,
            project_id,
        }) => {
            let project_id = match editor::accept(&namespace, project_id) {
                Ok(id) => id,
                Err(e) => return e.into_response(),
            };
            if state.projects.state(&project_id).await == ProjectState::Uninitialized {
                return AppError::ProjectNotFound(project_id).into_response();
            }
            let session = EditorSession::new(
                project_id.clone(),
                state.projects.workspace(&project_id),
                state.containers.clone(),
            );
            ws.on_upgrade(move |socket| editor::run(socket, session))
        }
    }
}
