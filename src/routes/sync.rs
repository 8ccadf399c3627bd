//! Sync API endpoint
//!
//! One round trip pushes the client's feature batch and pulls the server's
//! changes since the client's cursor. Field devices use `/sync`; the web map
//! editor uses `/web-sync`.

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::post,
    Json, Router,
};

use crate::error::Result;
use crate::identity::Actor;
use crate::state::AppState;
use crate::sync::{SyncResponse, WebSyncResponse};

use super::{parse_json_body, parse_project_id};

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync", post(sync_project))
        .route("/web-sync", post(web_sync_project))
}

/// Push local changes and pull server changes
async fn sync_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Actor(actor): Actor,
    body: Bytes,
) -> Result<Json<SyncResponse>> {
    let project_id = parse_project_id(&project_id)?;
    let body = parse_json_body(&body)?;

    let response = state.sync().sync(project_id, actor, body).await?;
    Ok(Json(response))
}

/// Push manually drawn features and pull everything else changed since `last_sync`
async fn web_sync_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Actor(actor): Actor,
    body: Bytes,
) -> Result<Json<WebSyncResponse>> {
    let project_id = parse_project_id(&project_id)?;
    let body = parse_json_body(&body)?;

    let response = state.sync().web_sync(project_id, actor, body).await?;
    Ok(Json(response))
}
