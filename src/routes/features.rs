//! Read-only feature views and web-client edits

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::{Feature, FeatureRepository, Point, PointRepository};
use crate::error::{AppError, Result};
use crate::geometry::{self, Coordinate};
use crate::identity::Actor;
use crate::state::AppState;
use crate::sync::{change_point, change_record, ChangePoint, ChangeRecord};
use crate::timestamp;

use super::{parse_json_body, parse_project_id};

/// Create the feature router (mounted under a project)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/active-features", get(active_features))
        .route("/features/geojson", get(features_geojson))
        .route("/features/:client_id", put(edit_feature))
        .route("/features/:client_id/inactivate", post(inactivate_feature))
        .route("/features/:client_id/history", get(feature_history))
}

#[derive(Debug, Serialize)]
pub struct ActiveFeaturesResponse {
    pub success: bool,
    pub features: Vec<ChangeRecord>,
    pub count: usize,
    pub message: String,
}

/// Acknowledgement of a web edit or soft delete
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureWriteResponse {
    pub success: bool,
    pub client_id: String,
    pub updated_at: String,
    pub message: String,
}

/// One replacement set of a feature's points
#[derive(Debug, Serialize)]
pub struct PointGeneration {
    pub generation: i64,
    pub active: bool,
    pub points: Vec<ChangePoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub success: bool,
    pub client_id: String,
    pub active: bool,
    pub generations: Vec<PointGeneration>,
}

async fn existing_project(state: &AppState, raw: &str) -> Result<i64> {
    let project_id = parse_project_id(raw)?;
    if !state.projects().exists(project_id).await? {
        return Err(AppError::NotFound(format!("Project {} not found", project_id)));
    }
    Ok(project_id)
}

/// Active features with their active points, grouped by feature
async fn load_active(state: &AppState, project_id: i64) -> Result<Vec<(Feature, Vec<Point>)>> {
    let mut conn = state.db().acquire().await?;
    let features = FeatureRepository::new(&mut conn).list_active(project_id).await?;
    let points = PointRepository::new(&mut conn)
        .active_for_project(project_id)
        .await?;

    let mut by_feature: HashMap<i64, Vec<Point>> = HashMap::new();
    for point in points {
        by_feature.entry(point.feature_id).or_default().push(point);
    }

    Ok(features
        .into_iter()
        .map(|feature| {
            let points = by_feature.remove(&feature.id).unwrap_or_default();
            (feature, points)
        })
        .collect())
}

/// Every active feature that still has geometry
async fn active_features(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<ActiveFeaturesResponse>> {
    let project_id = existing_project(&state, &project_id).await?;

    let features: Vec<ChangeRecord> = load_active(&state, project_id)
        .await?
        .iter()
        .filter(|(_, points)| !points.is_empty())
        .map(|(feature, points)| change_record(feature, points))
        .collect();

    let count = features.len();
    Ok(Json(ActiveFeaturesResponse {
        success: true,
        features,
        count,
        message: format!("Found {} active features", count),
    }))
}

/// GeoJSON FeatureCollection of the project's active features
async fn features_geojson(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>> {
    let project_id = existing_project(&state, &project_id).await?;

    let features: Vec<Value> = load_active(&state, project_id)
        .await?
        .iter()
        .map(|(feature, points)| {
            let vertices: Vec<Coordinate> = points.iter().map(|p| p.coordinate).collect();
            json!({
                "type": "Feature",
                "id": feature.client_id,
                "geometry": geometry::to_geojson(feature.feature_type, &vertices),
                "properties": {
                    "client_id": feature.client_id,
                    "name": feature.name,
                    "draw_layer": feature.draw_layer,
                    "type": feature.feature_type,
                    "attributes": feature.attributes,
                    "created_by": feature.created_by,
                    "created_at": timestamp::format(&feature.created_at),
                    "updated_by": feature.updated_by,
                    "updated_at": timestamp::format(&feature.updated_at),
                },
            })
        })
        .collect();

    Ok(Json(json!({
        "type": "FeatureCollection",
        "features": features,
    })))
}

/// Edit a feature's name, layer, type or geometry from the web client
async fn edit_feature(
    State(state): State<AppState>,
    Path((project_id, client_id)): Path<(String, String)>,
    Actor(actor): Actor,
    body: Bytes,
) -> Result<Json<FeatureWriteResponse>> {
    let project_id = parse_project_id(&project_id)?;
    let body = parse_json_body(&body)?;
    let updated_at = state
        .sync()
        .edit_feature(project_id, &client_id, actor, &body)
        .await?;

    Ok(Json(FeatureWriteResponse {
        success: true,
        message: format!("Feature {} updated", client_id),
        client_id,
        updated_at,
    }))
}

/// Soft-delete a feature from the web client
async fn inactivate_feature(
    State(state): State<AppState>,
    Path((project_id, client_id)): Path<(String, String)>,
    Actor(actor): Actor,
) -> Result<Json<FeatureWriteResponse>> {
    let project_id = parse_project_id(&project_id)?;
    let updated_at = state.sync().inactivate(project_id, &client_id, actor).await?;

    Ok(Json(FeatureWriteResponse {
        success: true,
        message: format!("Feature {} inactivated", client_id),
        client_id,
        updated_at,
    }))
}

/// Replay every point generation of a feature, oldest first
async fn feature_history(
    State(state): State<AppState>,
    Path((project_id, client_id)): Path<(String, String)>,
) -> Result<Json<HistoryResponse>> {
    let project_id = existing_project(&state, &project_id).await?;

    let mut conn = state.db().acquire().await?;
    let feature = FeatureRepository::new(&mut conn)
        .find_by_client_id(project_id, &client_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Feature {} not found", client_id)))?;
    let points = PointRepository::new(&mut conn).history(feature.id).await?;

    Ok(Json(HistoryResponse {
        success: true,
        client_id: feature.client_id,
        active: feature.is_active,
        generations: group_generations(&points),
    }))
}

fn group_generations(points: &[Point]) -> Vec<PointGeneration> {
    let mut generations: Vec<PointGeneration> = Vec::new();
    for point in points {
        match generations.last_mut() {
            Some(current) if current.generation == point.generation => {
                current.active |= point.is_active;
                current.points.push(change_point(point));
            }
            _ => generations.push(PointGeneration {
                generation: point.generation,
                active: point.is_active,
                points: vec![change_point(point)],
            }),
        }
    }
    generations
}
