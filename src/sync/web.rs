//! Web-client wire types
//!
//! The map editor pushes manually drawn features. Its edits are authoritative:
//! an accepted entry overwrites the stored record without a timestamp contest
//! and is stamped with the request's instant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::db::{Feature, Point};
use crate::error::{AppError, Result};
use crate::geometry::{Coordinate, GeometryType};
use crate::timestamp;

use super::changes::change_point;
use super::types::{
    geometry_type_of, non_empty_str, timezone_of, ChangePoint, FeatureChange, FeaturePayload,
    GeometryPayload, PointPayload, ValidationError,
};

/// `properties.source` of features drawn in the web editor
pub const MANUAL_SOURCE: &str = "manual";

/// Body of a web-client sync
#[derive(Debug, Clone)]
pub struct WebSyncRequest {
    pub features: Vec<Value>,
    /// Pull cursor; without one the response carries no server features
    pub last_sync: Option<DateTime<Utc>>,
    pub timezone: String,
}

impl WebSyncRequest {
    pub fn from_value(body: Value, default_timezone: &str) -> Result<Self> {
        let Value::Object(mut body) = body else {
            return Err(AppError::BadRequest("Invalid request format".to_string()));
        };

        let features = match body.remove("features") {
            Some(Value::Array(features)) => features,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(AppError::BadRequest("features must be an array".to_string()))
            }
        };

        Ok(Self {
            features,
            last_sync: timestamp::parse_value(body.get("last_sync")),
            timezone: timezone_of(&body, default_timezone),
        })
    }
}

/// The `client_id` of a web entry, when it has a usable one
pub fn web_client_id(entry: &Value) -> Option<&str> {
    entry
        .get("client_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

fn object_of(value: Option<&Value>) -> Map<String, Value> {
    value.and_then(Value::as_object).cloned().unwrap_or_default()
}

/// Translate a web entry into the change the applier understands
///
/// Feature attributes gain a `properties` map marked with the manual source
/// and the entry's `style`. A Point without `coordinates` takes its vertex
/// from `coords` and reuses the feature's client id.
pub fn web_change(
    client_id: &str,
    entry: &Value,
    now: DateTime<Utc>,
) -> std::result::Result<FeatureChange, ValidationError> {
    let entry = entry.as_object().ok_or(ValidationError::NotAnObject)?;
    let feature_type = geometry_type_of(entry.get("type"))?;
    let created_at = timestamp::parse_or(entry.get("created_at"), now);

    let mut attributes = object_of(entry.get("attributes"));
    let point_attributes = attributes.clone();

    let mut properties = object_of(entry.get("properties"));
    properties
        .entry("source")
        .or_insert_with(|| Value::String(MANUAL_SOURCE.to_string()));
    match entry.get("style") {
        Some(Value::Null) | None => {}
        Some(Value::Object(style)) if style.is_empty() => {}
        Some(Value::String(style)) if style.is_empty() => {}
        Some(style) => {
            properties.insert("style".to_string(), style.clone());
        }
    }
    attributes.insert("properties".to_string(), Value::Object(properties));

    let geometry = match (entry.get("coordinates"), feature_type) {
        (Some(coordinates), _) if !coordinates.is_null() => {
            Some(GeometryPayload::Coordinates(coordinates.clone()))
        }
        (_, Some(GeometryType::Point)) => Some(GeometryPayload::Points(vec![PointPayload {
            client_id: client_id.to_string(),
            coordinate: entry
                .get("coords")
                .map(Coordinate::from_value)
                .unwrap_or(Coordinate::ORIGIN),
            attributes: point_attributes,
            created_at: Some(created_at),
        }])),
        _ => None,
    };

    let name = non_empty_str(entry.get("name")).unwrap_or_else(|| format!("Feature {}", client_id));

    Ok(FeatureChange {
        client_id: client_id.to_string(),
        deleted: false,
        last_modified: None,
        data: Some(FeaturePayload {
            name: Some(name),
            draw_layer: non_empty_str(entry.get("draw_layer")),
            feature_type,
            attributes: Some(attributes),
            created_at: Some(created_at),
            geometry,
        }),
    })
}

/// Web edit of one stored feature
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEdit {
    pub name: Option<String>,
    pub draw_layer: Option<String>,
    pub feature_type: Option<GeometryType>,
    pub description: Option<String>,
    pub coordinates: Option<Value>,
}

impl FeatureEdit {
    pub fn from_value(body: &Value) -> Result<Self> {
        let body = body
            .as_object()
            .ok_or_else(|| AppError::BadRequest("Invalid request format".to_string()))?;

        Ok(Self {
            name: non_empty_str(body.get("name")),
            draw_layer: non_empty_str(body.get("draw_layer"))
                .or_else(|| non_empty_str(body.get("category"))),
            feature_type: geometry_type_of(body.get("type"))
                .map_err(|e| AppError::BadRequest(e.to_string()))?,
            description: body
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            coordinates: body.get("coordinates").filter(|c| !c.is_null()).cloned(),
        })
    }

    /// Change against `existing`; absent fields keep their stored values
    pub fn into_change(self, existing: &Feature) -> FeatureChange {
        let attributes = self.description.map(|description| {
            let mut attributes = existing.attributes.clone();
            attributes.insert("description".to_string(), Value::String(description));
            attributes
        });

        FeatureChange {
            client_id: existing.client_id.clone(),
            deleted: false,
            last_modified: None,
            data: Some(FeaturePayload {
                name: self.name,
                draw_layer: self.draw_layer,
                feature_type: self.feature_type,
                attributes,
                created_at: None,
                geometry: self.coordinates.map(GeometryPayload::Coordinates),
            }),
        }
    }
}

/// Response of the web sync endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSyncResponse {
    pub success: bool,
    pub synced_ids: Vec<String>,
    pub server_features: Vec<ServerFeature>,
    pub server_time: String,
}

/// A server feature as the map editor draws it
#[derive(Debug, Clone, Serialize)]
pub struct ServerFeature {
    pub client_id: String,
    pub draw_layer: String,
    #[serde(rename = "type")]
    pub feature_type: GeometryType,
    pub name: Option<String>,
    pub project_id: i64,
    /// First vertex, used as the marker position
    pub coords: Value,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub attributes: Map<String, Value>,
    pub points: Vec<ChangePoint>,
}

/// Editor record for a feature; `None` when it has no active points
pub fn server_feature(feature: &Feature, points: &[Point]) -> Option<ServerFeature> {
    let first = points.first()?;

    let mut attributes = feature.attributes.clone();
    attributes.insert(
        "type".to_string(),
        Value::String(feature.feature_type.as_str().to_string()),
    );
    attributes.insert(
        "featureTypeName".to_string(),
        feature.name.clone().map(Value::String).unwrap_or(Value::Null),
    );
    attributes.insert(
        "draw_layer".to_string(),
        Value::String(feature.draw_layer.clone()),
    );

    Some(ServerFeature {
        client_id: feature.client_id.clone(),
        draw_layer: feature.draw_layer.clone(),
        feature_type: feature.feature_type,
        name: feature.name.clone(),
        project_id: feature.project_id,
        coords: first.coordinate.to_value(),
        created_by: feature.created_by,
        updated_by: feature.updated_by,
        created_at: timestamp::format(&feature.created_at),
        updated_at: timestamp::format(&feature.updated_at),
        attributes,
        points: points.iter().map(change_point).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_web_request_cursor_is_optional() {
        let request = WebSyncRequest::from_value(json!({"features": []}), "UTC").unwrap();
        assert!(request.last_sync.is_none());

        let request = WebSyncRequest::from_value(
            json!({"last_sync": "2024-01-01T00:00:00Z", "timezone": "Asia/Tokyo"}),
            "UTC",
        )
        .unwrap();
        assert!(request.features.is_empty());
        assert_eq!(request.last_sync, timestamp::parse("2024-01-01T00:00:00Z"));
        assert_eq!(request.timezone, "Asia/Tokyo");

        assert!(matches!(
            WebSyncRequest::from_value(json!([]), "UTC"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_web_point_is_marked_manual() {
        let now = timestamp::server_now();
        let entry = json!({
            "client_id": "w1",
            "type": "Point",
            "draw_layer": "Electric Pole",
            "attributes": {"height": 12},
            "style": {"color": "#ff0000"},
            "coords": [-71.05, 42.36],
            "created_at": "not a date"
        });

        let change = web_change("w1", &entry, now).unwrap();
        assert!(change.last_modified.is_none());
        let data = change.data.unwrap();
        assert_eq!(data.name.as_deref(), Some("Feature w1"));
        assert_eq!(data.created_at, Some(now));

        let attributes = data.attributes.unwrap();
        assert_eq!(attributes["height"], 12);
        assert_eq!(attributes["properties"]["source"], MANUAL_SOURCE);
        assert_eq!(attributes["properties"]["style"]["color"], "#ff0000");

        let Some(GeometryPayload::Points(points)) = data.geometry else {
            panic!("expected a point");
        };
        assert_eq!(points[0].client_id, "w1");
        assert_eq!(points[0].coordinate, Coordinate::new(-71.05, 42.36));
        assert!(!points[0].attributes.contains_key("properties"));
    }

    #[test]
    fn test_web_entry_keeps_explicit_source() {
        let entry = json!({
            "client_id": "w2",
            "type": "Line",
            "draw_layer": "Road",
            "properties": {"source": "import"},
            "coordinates": [[0, 0], [1, 1]]
        });

        let data = web_change("w2", &entry, timestamp::server_now()).unwrap().data.unwrap();
        assert_eq!(data.attributes.unwrap()["properties"]["source"], "import");
        assert!(matches!(data.geometry, Some(GeometryPayload::Coordinates(_))));

        assert_eq!(web_client_id(&json!({"client_id": " w2 "})), Some("w2"));
        assert_eq!(web_client_id(&json!({"clientId": "w2"})), None);
    }

    #[test]
    fn test_feature_edit_accepts_category_alias() {
        let edit = FeatureEdit::from_value(&json!({
            "category": "Storm Drain",
            "description": "cleared",
            "coordinates": null
        }))
        .unwrap();
        assert_eq!(edit.draw_layer.as_deref(), Some("Storm Drain"));
        assert!(edit.coordinates.is_none());

        assert!(matches!(
            FeatureEdit::from_value(&json!({"type": "Blob"})),
            Err(AppError::BadRequest(_))
        ));
    }
}
