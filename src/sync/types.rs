//! Sync wire types
//!
//! Requests are parsed from a raw `serde_json::Value` rather than derived, so
//! that one malformed entry in `features` is reported per feature instead of
//! failing the whole batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{AppError, Result};
use crate::geometry::{self, Coordinate, GeometryError, GeometryType};
use crate::timestamp;

/// Length of a derived feature code
pub const FCODE_LEN: usize = 5;

/// Per-feature validation failure; recorded in `failed`, never aborts the batch
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("entry is not an object")]
    NotAnObject,

    #[error("non-deleted entry has no data object")]
    MissingData,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{0} must be an object")]
    NotAMap(&'static str),

    #[error("{0} must be an array")]
    NotAList(&'static str),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("type change from {from} to {to} requires a new point set")]
    TypeChangeWithoutPoints { from: GeometryType, to: GeometryType },
}

/// Validated top-level sync request
#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// Raw entries, validated one by one during the apply loop
    pub features: Vec<Value>,
    /// Client cursor; epoch when missing or unparseable
    pub last_sync: DateTime<Utc>,
    /// Backfilled into attribute maps lacking `timezone`
    pub timezone: String,
}

impl SyncRequest {
    pub fn from_value(body: Value, default_timezone: &str) -> Result<Self> {
        let Value::Object(mut body) = body else {
            return Err(AppError::BadRequest(
                "Sync request must be a JSON object".to_string(),
            ));
        };

        let features = match body.remove("features") {
            Some(Value::Array(features)) => features,
            Some(_) => {
                return Err(AppError::BadRequest("features must be an array".to_string()))
            }
            None => return Err(AppError::BadRequest("features is required".to_string())),
        };

        Ok(Self {
            features,
            last_sync: timestamp::parse_or_epoch(body.get("lastSyncTimestamp")),
            timezone: timezone_of(&body, default_timezone),
        })
    }
}

/// Request-level `timezone`, or the configured default
pub(super) fn timezone_of(body: &Map<String, Value>, default_timezone: &str) -> String {
    body.get("timezone")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|tz| !tz.is_empty())
        .unwrap_or(default_timezone)
        .to_string()
}

/// The `clientId` of an entry, when it has a usable one
pub fn client_id_of(entry: &Value) -> Option<&str> {
    entry
        .get("clientId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// Distinct usable ids of a batch, in first-seen order
pub fn pushed_ids(entries: &[Value], id_of: fn(&Value) -> Option<&str>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in entries.iter().filter_map(id_of) {
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// One entry of the `features` batch
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureChange {
    pub client_id: String,
    pub deleted: bool,
    /// Declared modification instant; `None` is never newer than the server
    pub last_modified: Option<DateTime<Utc>>,
    pub data: Option<FeaturePayload>,
}

impl FeatureChange {
    pub fn parse(client_id: &str, entry: &Value) -> std::result::Result<Self, ValidationError> {
        let entry = entry.as_object().ok_or(ValidationError::NotAnObject)?;
        let deleted = entry.get("deleted").and_then(Value::as_bool).unwrap_or(false);

        let data = match entry.get("data") {
            Some(Value::Object(data)) => Some(FeaturePayload::parse(data)?),
            Some(Value::Null) | None => None,
            Some(_) => return Err(ValidationError::NotAMap("data")),
        };
        if !deleted && data.is_none() {
            return Err(ValidationError::MissingData);
        }

        Ok(Self {
            client_id: client_id.to_string(),
            deleted,
            last_modified: timestamp::parse_value(entry.get("lastModified")),
            data,
        })
    }
}

/// The `data` object of a non-deleted entry
///
/// Absent fields are `None` so an update keeps the stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePayload {
    pub name: Option<String>,
    pub draw_layer: Option<String>,
    pub feature_type: Option<GeometryType>,
    pub attributes: Option<Map<String, Value>>,
    pub created_at: Option<DateTime<Utc>>,
    pub geometry: Option<GeometryPayload>,
}

/// Point set carried by an entry
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryPayload {
    /// Per-vertex objects from `data.points`
    Points(Vec<PointPayload>),
    /// Codec payload from `data.coordinates`, decoded once the type is known
    Coordinates(Value),
}

impl FeaturePayload {
    fn parse(data: &Map<String, Value>) -> std::result::Result<Self, ValidationError> {
        let feature_type = geometry_type_of(data.get("type"))?;

        let attributes = match data.get("attributes") {
            Some(Value::Object(map)) => Some(map.clone()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(ValidationError::NotAMap("attributes")),
        };

        let geometry = match (data.get("points"), data.get("coordinates")) {
            (Some(Value::Array(points)), _) => Some(GeometryPayload::Points(
                points.iter().filter_map(PointPayload::parse).collect(),
            )),
            (Some(Value::Null) | None, Some(Value::Null) | None) => None,
            (Some(Value::Null) | None, Some(coordinates)) => {
                Some(GeometryPayload::Coordinates(coordinates.clone()))
            }
            (Some(_), _) => return Err(ValidationError::NotAList("points")),
        };

        Ok(Self {
            name: non_empty_str(data.get("name")),
            draw_layer: non_empty_str(data.get("draw_layer")),
            feature_type,
            attributes,
            created_at: timestamp::parse_value(data.get("created_at")),
            geometry,
        })
    }
}

impl GeometryPayload {
    /// Resolve into an ordered vertex list for a feature of `kind`
    pub fn into_points(
        self,
        kind: GeometryType,
        client_id: &str,
    ) -> std::result::Result<Vec<PointPayload>, ValidationError> {
        match self {
            GeometryPayload::Points(points) => Ok(points),
            GeometryPayload::Coordinates(payload) => Ok(geometry::encode(kind, &payload)?
                .into_iter()
                .enumerate()
                .map(|(n, coordinate)| PointPayload {
                    client_id: format!("{}-{}", client_id, n + 1),
                    coordinate,
                    attributes: Map::new(),
                    created_at: None,
                })
                .collect()),
        }
    }
}

/// One vertex as sent by the client
#[derive(Debug, Clone, PartialEq)]
pub struct PointPayload {
    pub client_id: String,
    pub coordinate: Coordinate,
    pub attributes: Map<String, Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PointPayload {
    /// Points without an object shape or a `client_id` are dropped
    fn parse(value: &Value) -> Option<Self> {
        let point = value.as_object()?;
        let client_id = non_empty_str(point.get("client_id"))?;

        Some(Self {
            client_id,
            coordinate: point
                .get("coords")
                .map(Coordinate::from_value)
                .unwrap_or(Coordinate::ORIGIN),
            attributes: point
                .get("attributes")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            created_at: timestamp::parse_value(point.get("created_at")),
        })
    }
}

pub(super) fn geometry_type_of(
    value: Option<&Value>,
) -> std::result::Result<Option<GeometryType>, ValidationError> {
    match value {
        Some(Value::String(kind)) => Ok(Some(kind.parse::<GeometryType>()?)),
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(GeometryError::UnknownType(other.to_string()).into()),
    }
}

pub(super) fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Feature code of every point under a feature: its draw layer, cut to five characters
pub fn feature_code(draw_layer: &str) -> String {
    draw_layer.chars().take(FCODE_LEN).collect()
}

/// Insert `timezone` unless the map already carries one
pub fn backfill_timezone(attributes: &mut Map<String, Value>, timezone: &str) {
    attributes
        .entry("timezone")
        .or_insert_with(|| Value::String(timezone.to_string()));
}

/// Response of the sync endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub processed: Vec<String>,
    pub failed: Vec<String>,
    pub changes: Vec<ChangeRecord>,
    pub server_timestamp: String,
}

/// One server-side change pulled by the client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub client_id: String,
    pub last_modified: String,
    pub deleted: bool,
    pub data: ChangeData,
}

/// Full field state of a changed feature
#[derive(Debug, Clone, Serialize)]
pub struct ChangeData {
    pub name: Option<String>,
    pub draw_layer: String,
    #[serde(rename = "type")]
    pub feature_type: GeometryType,
    pub project_id: i64,
    pub attributes: Map<String, Value>,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_by: Option<i64>,
    pub updated_at: String,
    pub points: Vec<ChangePoint>,
    /// Codec-decoded geometry; `null` when deleted or without points
    pub coordinates: Value,
    pub timezone: String,
}

/// One vertex inside a change record
#[derive(Debug, Clone, Serialize)]
pub struct ChangePoint {
    pub client_id: String,
    pub fcode: String,
    pub coords: Value,
    pub attributes: Map<String, Value>,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_by: Option<i64>,
    pub updated_at: String,
    pub is_active: bool,
    pub timezone: String,
}
