//! Geometry point database operations
//!
//! Points are never updated in place. A geometry change deactivates the
//! current set and appends a new generation.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqliteConnection;

use crate::error::Result;
use crate::geometry::{Coordinate, SRID};
use crate::timestamp;

const POINT_COLUMNS: &str = "id, client_id, feature_id, project_id, fcode, longitude, latitude, srid, \
     attributes, generation, seq, is_active, created_by, created_at, updated_by, updated_at";

/// One stored vertex of a feature's geometry
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: i64,
    pub client_id: String,
    pub feature_id: i64,
    pub project_id: i64,
    pub fcode: String,
    pub coordinate: Coordinate,
    pub srid: i64,
    pub attributes: Map<String, Value>,
    pub generation: i64,
    pub seq: i64,
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl Point {
    pub fn timezone(&self) -> &str {
        self.attributes
            .get("timezone")
            .and_then(Value::as_str)
            .unwrap_or("UTC")
    }
}

#[derive(sqlx::FromRow)]
struct PointRow {
    id: i64,
    client_id: String,
    feature_id: i64,
    project_id: i64,
    fcode: String,
    longitude: f64,
    latitude: f64,
    srid: i64,
    attributes: String,
    generation: i64,
    seq: i64,
    is_active: bool,
    created_by: Option<i64>,
    created_at: String,
    updated_by: Option<i64>,
    updated_at: String,
}

impl TryFrom<PointRow> for Point {
    type Error = crate::error::AppError;

    fn try_from(row: PointRow) -> Result<Self> {
        Ok(Point {
            id: row.id,
            client_id: row.client_id,
            feature_id: row.feature_id,
            project_id: row.project_id,
            fcode: row.fcode,
            coordinate: Coordinate::new(row.longitude, row.latitude),
            srid: row.srid,
            attributes: serde_json::from_str(&row.attributes)?,
            generation: row.generation,
            seq: row.seq,
            is_active: row.is_active,
            created_by: row.created_by,
            created_at: timestamp::from_storage(&row.created_at),
            updated_by: row.updated_by,
            updated_at: timestamp::from_storage(&row.updated_at),
        })
    }
}

/// A vertex ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewPoint {
    pub client_id: String,
    pub fcode: String,
    pub coordinate: Coordinate,
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl NewPoint {
    /// Whether this vertex describes the same stored vertex (ignoring audit fields)
    pub fn same_vertex(&self, stored: &Point) -> bool {
        self.client_id == stored.client_id
            && self.fcode == stored.fcode
            && self.coordinate == stored.coordinate
            && self.attributes == stored.attributes
    }
}

/// Point repository bound to one connection
pub struct PointRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> PointRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Active points of a feature in creation order
    pub async fn active_for_feature(&mut self, feature_id: i64) -> Result<Vec<Point>> {
        let sql = format!(
            "SELECT {} FROM collected_points WHERE feature_id = ? AND is_active = 1 ORDER BY seq ASC, id ASC",
            POINT_COLUMNS
        );

        let rows = sqlx::query_as::<_, PointRow>(&sql)
            .bind(feature_id)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(Point::try_from).collect()
    }

    /// Active points of every feature in a project, grouped by feature
    pub async fn active_for_project(&mut self, project_id: i64) -> Result<Vec<Point>> {
        let sql = format!(
            "SELECT {} FROM collected_points WHERE project_id = ? AND is_active = 1 \
             ORDER BY feature_id ASC, seq ASC, id ASC",
            POINT_COLUMNS
        );

        let rows = sqlx::query_as::<_, PointRow>(&sql)
            .bind(project_id)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(Point::try_from).collect()
    }

    /// Mark the feature's active points inactive; returns how many were touched
    pub async fn deactivate_active(
        &mut self,
        feature_id: i64,
        actor: i64,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE collected_points
            SET is_active = 0, updated_by = ?, updated_at = ?
            WHERE feature_id = ? AND is_active = 1
            "#,
        )
        .bind(actor)
        .bind(timestamp::format(&at))
        .bind(feature_id)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Rewrite the feature code of the active points in place
    pub async fn restamp_fcode(
        &mut self,
        feature_id: i64,
        fcode: &str,
        actor: i64,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE collected_points
            SET fcode = ?, updated_by = ?, updated_at = ?
            WHERE feature_id = ? AND is_active = 1 AND fcode <> ?
            "#,
        )
        .bind(fcode)
        .bind(actor)
        .bind(timestamp::format(&at))
        .bind(feature_id)
        .bind(fcode)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Generation number for the next replacement set
    pub async fn next_generation(&mut self, feature_id: i64) -> Result<i64> {
        let (current,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(generation) FROM collected_points WHERE feature_id = ?")
                .bind(feature_id)
                .fetch_one(&mut *self.conn)
                .await?;

        Ok(current.unwrap_or(0) + 1)
    }

    /// Append one active generation of points, in the given order
    pub async fn insert_generation(
        &mut self,
        feature_id: i64,
        project_id: i64,
        generation: i64,
        points: &[NewPoint],
        actor: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let updated_at = timestamp::format(&at);

        for (seq, point) in points.iter().enumerate() {
            let attributes = serde_json::to_string(&point.attributes)?;

            sqlx::query(
                r#"
                INSERT INTO collected_points (
                    client_id, feature_id, project_id, fcode, longitude, latitude, srid,
                    attributes, generation, seq, is_active,
                    created_by, created_at, updated_by, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
                "#,
            )
            .bind(&point.client_id)
            .bind(feature_id)
            .bind(project_id)
            .bind(&point.fcode)
            .bind(point.coordinate.lon)
            .bind(point.coordinate.lat)
            .bind(SRID)
            .bind(&attributes)
            .bind(generation)
            .bind(seq as i64)
            .bind(actor)
            .bind(timestamp::format(&point.created_at))
            .bind(actor)
            .bind(&updated_at)
            .execute(&mut *self.conn)
            .await?;
        }

        Ok(())
    }

    /// Every point ever stored for a feature, oldest generation first
    pub async fn history(&mut self, feature_id: i64) -> Result<Vec<Point>> {
        let sql = format!(
            "SELECT {} FROM collected_points WHERE feature_id = ? ORDER BY generation ASC, seq ASC, id ASC",
            POINT_COLUMNS
        );

        let rows = sqlx::query_as::<_, PointRow>(&sql)
            .bind(feature_id)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(Point::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_in_memory, FeatureRepository, NewFeature, ProjectRepository};
    use crate::geometry::GeometryType;

    fn vertex(client_id: &str, lon: f64, lat: f64, at: DateTime<Utc>) -> NewPoint {
        NewPoint {
            client_id: client_id.to_string(),
            fcode: "Fence".to_string(),
            coordinate: Coordinate::new(lon, lat),
            attributes: Map::new(),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_generations_are_append_only() {
        let pool = connect_in_memory().await.unwrap();
        let project = ProjectRepository::new(&pool).create("p").await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let now = timestamp::server_now();

        let feature = FeatureRepository::new(&mut conn)
            .insert(&NewFeature {
                client_id: "line-1".to_string(),
                project_id: project.id,
                draw_layer: "Fence line".to_string(),
                feature_type: GeometryType::Line,
                name: None,
                attributes: Map::new(),
                actor: 1,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let mut points = PointRepository::new(&mut conn);
        assert_eq!(points.next_generation(feature.id).await.unwrap(), 1);
        points
            .insert_generation(
                feature.id,
                project.id,
                1,
                &[vertex("v1", 0.0, 0.0, now), vertex("v2", 1.0, 1.0, now)],
                1,
                now,
            )
            .await
            .unwrap();

        assert_eq!(points.deactivate_active(feature.id, 2, now).await.unwrap(), 2);
        let generation = points.next_generation(feature.id).await.unwrap();
        assert_eq!(generation, 2);
        points
            .insert_generation(feature.id, project.id, generation, &[vertex("v3", 5.0, 5.0, now)], 2, now)
            .await
            .unwrap();

        let active = points.active_for_feature(feature.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].client_id, "v3");
        assert_eq!(active[0].srid, SRID);

        let history = points.history(feature.id).await.unwrap();
        let order: Vec<(i64, &str, bool)> = history
            .iter()
            .map(|p| (p.generation, p.client_id.as_str(), p.is_active))
            .collect();
        assert_eq!(
            order,
            vec![(1, "v1", false), (1, "v2", false), (2, "v3", true)]
        );

        let later = now + chrono::Duration::seconds(5);
        assert_eq!(points.restamp_fcode(feature.id, "Gate", 3, later).await.unwrap(), 1);
        assert_eq!(points.restamp_fcode(feature.id, "Gate", 3, later).await.unwrap(), 0);

        let history = points.history(feature.id).await.unwrap();
        let codes: Vec<(&str, &str)> = history
            .iter()
            .map(|p| (p.client_id.as_str(), p.fcode.as_str()))
            .collect();
        assert_eq!(codes, vec![("v1", "Fence"), ("v2", "Fence"), ("v3", "Gate")]);
        assert_eq!(history[2].updated_by, Some(3));
        assert_eq!(history[2].updated_at, later);
    }
}
