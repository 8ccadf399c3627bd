//! Collected feature database operations

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqliteConnection;

use crate::error::{AppError, Result};
use crate::geometry::GeometryType;
use crate::timestamp;

const FEATURE_COLUMNS: &str = "id, client_id, project_id, draw_layer, feature_type, name, attributes, \
     is_active, created_by, created_at, updated_by, updated_at";

/// A field-collected feature
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: i64,
    pub client_id: String,
    pub project_id: i64,
    pub draw_layer: String,
    pub feature_type: GeometryType,
    pub name: Option<String>,
    pub attributes: Map<String, Value>,
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl Feature {
    /// Timezone recorded by the originating client
    pub fn timezone(&self) -> &str {
        self.attributes
            .get("timezone")
            .and_then(Value::as_str)
            .unwrap_or("UTC")
    }
}

#[derive(sqlx::FromRow)]
struct FeatureRow {
    id: i64,
    client_id: String,
    project_id: i64,
    draw_layer: String,
    feature_type: String,
    name: Option<String>,
    attributes: String,
    is_active: bool,
    created_by: Option<i64>,
    created_at: String,
    updated_by: Option<i64>,
    updated_at: String,
}

impl TryFrom<FeatureRow> for Feature {
    type Error = AppError;

    fn try_from(row: FeatureRow) -> Result<Self> {
        let feature_type = row.feature_type.parse::<GeometryType>().map_err(|e| {
            AppError::Internal(format!("feature {} has bad type: {}", row.id, e))
        })?;

        Ok(Feature {
            id: row.id,
            client_id: row.client_id,
            project_id: row.project_id,
            draw_layer: row.draw_layer,
            feature_type,
            name: row.name,
            attributes: serde_json::from_str(&row.attributes)?,
            is_active: row.is_active,
            created_by: row.created_by,
            created_at: timestamp::from_storage(&row.created_at),
            updated_by: row.updated_by,
            updated_at: timestamp::from_storage(&row.updated_at),
        })
    }
}

/// Insert payload for a new feature
#[derive(Debug, Clone, PartialEq)]
pub struct NewFeature {
    pub client_id: String,
    pub project_id: i64,
    pub draw_layer: String,
    pub feature_type: GeometryType,
    pub name: Option<String>,
    pub attributes: Map<String, Value>,
    pub actor: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-place overwrite of a feature's fields
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureUpdate {
    pub draw_layer: String,
    pub feature_type: GeometryType,
    pub name: Option<String>,
    pub attributes: Map<String, Value>,
    pub actor: i64,
    pub updated_at: DateTime<Utc>,
}

/// Feature repository bound to one connection (usually an open transaction)
pub struct FeatureRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> FeatureRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Find a feature (active or not) by its client id
    pub async fn find_by_client_id(
        &mut self,
        project_id: i64,
        client_id: &str,
    ) -> Result<Option<Feature>> {
        let sql = format!(
            "SELECT {} FROM collected_features WHERE project_id = ? AND client_id = ?",
            FEATURE_COLUMNS
        );

        let row = sqlx::query_as::<_, FeatureRow>(&sql)
            .bind(project_id)
            .bind(client_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.map(Feature::try_from).transpose()
    }

    /// Insert a new active feature
    pub async fn insert(&mut self, new: &NewFeature) -> Result<Feature> {
        let attributes = serde_json::to_string(&new.attributes)?;

        let result = sqlx::query(
            r#"
            INSERT INTO collected_features (
                client_id, project_id, draw_layer, feature_type, name, attributes,
                is_active, created_by, created_at, updated_by, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.client_id)
        .bind(new.project_id)
        .bind(&new.draw_layer)
        .bind(new.feature_type.as_str())
        .bind(&new.name)
        .bind(&attributes)
        .bind(new.actor)
        .bind(timestamp::format(&new.created_at))
        .bind(new.actor)
        .bind(timestamp::format(&new.updated_at))
        .execute(&mut *self.conn)
        .await?;

        Ok(Feature {
            id: result.last_insert_rowid(),
            client_id: new.client_id.clone(),
            project_id: new.project_id,
            draw_layer: new.draw_layer.clone(),
            feature_type: new.feature_type,
            name: new.name.clone(),
            attributes: new.attributes.clone(),
            is_active: true,
            created_by: Some(new.actor),
            created_at: new.created_at,
            updated_by: Some(new.actor),
            updated_at: new.updated_at,
        })
    }

    /// Overwrite a feature's fields and advance its `updated_at`
    pub async fn update(&mut self, id: i64, update: &FeatureUpdate) -> Result<()> {
        let attributes = serde_json::to_string(&update.attributes)?;

        sqlx::query(
            r#"
            UPDATE collected_features
            SET draw_layer = ?, feature_type = ?, name = ?, attributes = ?,
                updated_by = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.draw_layer)
        .bind(update.feature_type.as_str())
        .bind(&update.name)
        .bind(&attributes)
        .bind(update.actor)
        .bind(timestamp::format(&update.updated_at))
        .bind(id)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Soft-delete a feature, stamping the actor and instant even if already inactive
    pub async fn deactivate(&mut self, id: i64, actor: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE collected_features SET is_active = 0, updated_by = ?, updated_at = ? WHERE id = ?",
        )
        .bind(actor)
        .bind(timestamp::format(&at))
        .bind(id)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Features of a project modified strictly after `cursor`, oldest first
    pub async fn changed_since(
        &mut self,
        project_id: i64,
        cursor: DateTime<Utc>,
        excluded_client_ids: &[String],
    ) -> Result<Vec<Feature>> {
        // One bound JSON array instead of a placeholder per id
        let sql = format!(
            "SELECT {} FROM collected_features \
             WHERE project_id = ? AND updated_at > ? \
             AND client_id NOT IN (SELECT value FROM json_each(?)) \
             ORDER BY updated_at ASC, id ASC",
            FEATURE_COLUMNS
        );
        let excluded = serde_json::to_string(excluded_client_ids)?;

        let query = sqlx::query_as::<_, FeatureRow>(&sql)
            .bind(project_id)
            .bind(timestamp::format(&cursor))
            .bind(excluded);

        let rows = query.fetch_all(&mut *self.conn).await?;
        rows.into_iter().map(Feature::try_from).collect()
    }

    /// Every active feature of a project, in creation order
    pub async fn list_active(&mut self, project_id: i64) -> Result<Vec<Feature>> {
        let sql = format!(
            "SELECT {} FROM collected_features WHERE project_id = ? AND is_active = 1 ORDER BY id ASC",
            FEATURE_COLUMNS
        );

        let rows = sqlx::query_as::<_, FeatureRow>(&sql)
            .bind(project_id)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.into_iter().map(Feature::try_from).collect()
    }
}
