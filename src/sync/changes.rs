//! Change-set extraction
//!
//! Builds the pull half of a sync: every feature of the project modified after
//! the client's cursor, minus every feature the request itself pushed.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db::{Feature, FeatureRepository, Point, PointRepository};
use crate::error::Result;
use crate::geometry::{self, Coordinate};
use crate::timestamp;

use super::types::{ChangeData, ChangePoint, ChangeRecord};

/// Reads the change-set inside the request's transaction
pub struct ChangeSetExtractor {
    project_id: i64,
}

impl ChangeSetExtractor {
    pub fn new(project_id: i64) -> Self {
        Self { project_id }
    }

    /// Features with `updated_at > cursor`, oldest first, skipping `excluded`
    pub async fn extract(
        &self,
        conn: &mut SqliteConnection,
        cursor: DateTime<Utc>,
        excluded: &[String],
    ) -> Result<Vec<ChangeRecord>> {
        let features = FeatureRepository::new(&mut *conn)
            .changed_since(self.project_id, cursor, excluded)
            .await?;

        let mut changes = Vec::with_capacity(features.len());
        for feature in &features {
            let points = if feature.is_active {
                PointRepository::new(&mut *conn)
                    .active_for_feature(feature.id)
                    .await?
            } else {
                Vec::new()
            };
            changes.push(change_record(feature, &points));
        }

        Ok(changes)
    }
}

/// Wire record for a feature and its active points
pub fn change_record(feature: &Feature, points: &[Point]) -> ChangeRecord {
    let deleted = !feature.is_active;
    let points: &[Point] = if deleted { &[] } else { points };

    let vertices: Vec<Coordinate> = points.iter().map(|p| p.coordinate).collect();
    let updated_at = timestamp::format(&feature.updated_at);

    ChangeRecord {
        client_id: feature.client_id.clone(),
        last_modified: updated_at.clone(),
        deleted,
        data: ChangeData {
            name: feature.name.clone(),
            draw_layer: feature.draw_layer.clone(),
            feature_type: feature.feature_type,
            project_id: feature.project_id,
            attributes: feature.attributes.clone(),
            created_by: feature.created_by,
            created_at: timestamp::format(&feature.created_at),
            updated_by: feature.updated_by,
            updated_at,
            points: points.iter().map(change_point).collect(),
            coordinates: geometry::decode(feature.feature_type, &vertices),
            timezone: feature.timezone().to_string(),
        },
    }
}

pub fn change_point(point: &Point) -> ChangePoint {
    ChangePoint {
        client_id: point.client_id.clone(),
        fcode: point.fcode.clone(),
        coords: point.coordinate.to_value(),
        attributes: point.attributes.clone(),
        created_by: point.created_by,
        created_at: timestamp::format(&point.created_at),
        updated_by: point.updated_by,
        updated_at: timestamp::format(&point.updated_at),
        is_active: point.is_active,
        timezone: point.timezone().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryType;
    use serde_json::{json, Map};

    fn polygon(is_active: bool) -> Feature {
        let at = timestamp::parse("2024-03-01T10:00:00.5Z").unwrap();
        Feature {
            id: 9,
            client_id: "poly".to_string(),
            project_id: 2,
            draw_layer: "Parcel".to_string(),
            feature_type: GeometryType::Polygon,
            name: Some("Lot 4".to_string()),
            attributes: json!({"timezone": "Asia/Tokyo"}).as_object().cloned().unwrap(),
            is_active,
            created_by: Some(1),
            created_at: at,
            updated_by: Some(2),
            updated_at: at,
        }
    }

    fn vertex(seq: i64, lon: f64, lat: f64) -> Point {
        let at = timestamp::parse("2024-03-01T10:00:00Z").unwrap();
        Point {
            id: seq,
            client_id: format!("v{}", seq),
            feature_id: 9,
            project_id: 2,
            fcode: "Parce".to_string(),
            coordinate: Coordinate::new(lon, lat),
            srid: geometry::SRID,
            attributes: Map::new(),
            generation: 1,
            seq,
            is_active: true,
            created_by: Some(1),
            created_at: at,
            updated_by: Some(1),
            updated_at: at,
        }
    }

    #[test]
    fn test_active_record_closes_ring() {
        let points = vec![vertex(0, 0.0, 0.0), vertex(1, 1.0, 0.0), vertex(2, 1.0, 1.0)];
        let record = change_record(&polygon(true), &points);

        assert!(!record.deleted);
        assert_eq!(record.last_modified, "2024-03-01T10:00:00.500000Z");
        assert_eq!(record.data.points.len(), 3);
        assert_eq!(record.data.points[1].timezone, "UTC");
        assert_eq!(record.data.coordinates, json!([[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]));
        assert_eq!(record.data.timezone, "Asia/Tokyo");

        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire["clientId"], "poly");
        assert_eq!(wire["data"]["type"], "Polygon");
        assert_eq!(wire["data"]["points"][0]["coords"], json!([0.0, 0.0]));
    }

    #[test]
    fn test_deleted_record_has_no_points() {
        let points = vec![vertex(0, 0.0, 0.0)];
        let record = change_record(&polygon(false), &points);

        assert!(record.deleted);
        assert!(record.data.points.is_empty());
        assert!(record.data.coordinates.is_null());
    }
}
