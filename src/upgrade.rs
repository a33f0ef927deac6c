//! Classification of inbound WebSocket upgrade requests.
//!
//! Any upgrade whose path contains `terminal` belongs to the terminal tunnel;
//! everything else is handed to the editor channel layer, which does its own
//! namespace check.

use crate::container::validate_project_id;
use crate::error::AppError;
use axum::extract::Query;
use axum::http::Uri;
use serde::Deserialize;

/// Marker substring selecting the terminal tunnel.
pub const TERMINAL_MARKER: &str = "terminal";

/// Where an upgrade request should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeRoute {
    Terminal {
        project_id: String,
    },
    Editor {
        namespace: String,
        project_id: Option<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct ConnectQuery {
    #[serde(rename = "projectId")]
    project_id: Option<String>,
}

pub fn is_terminal_path(path: &str) -> bool {
    path.contains(TERMINAL_MARKER)
}

/// Read the `projectId` query parameter, percent-decoded.
pub fn project_id_param(uri: &Uri) -> Option<String> {
    Query::<ConnectQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(q)| q.project_id)
        .filter(|id| !id.is_empty())
}

/// Decide which layer handles an upgrade request for `uri`.
///
/// Terminal upgrades must carry a valid `projectId`; editor upgrades are
/// passed through untouched.
pub fn classify(uri: &Uri) -> Result<UpgradeRoute, AppError> {
    let path = uri.path();
    if is_terminal_path(path) {
        let project_id = project_id_param(uri)
            .ok_or_else(|| AppError::BadRequest("missing projectId query parameter".into()))?;
        validate_project_id(&project_id)?;
        Ok(UpgradeRoute::Terminal { project_id })
    } else {
        Ok(UpgradeRoute::Editor {
            namespace: path.to_string(),
            project_id: project_id_param(uri),
        })
    }
}
