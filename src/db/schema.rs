//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Projects (provisioned out of band; sync only checks existence)
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

-- Field-collected features
CREATE TABLE IF NOT EXISTS collected_features (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id TEXT NOT NULL,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    draw_layer TEXT NOT NULL,
    feature_type TEXT NOT NULL CHECK (feature_type IN ('Point', 'Line', 'Polygon')),
    name TEXT,
    -- Open-ended attribute map (JSON object)
    attributes TEXT NOT NULL DEFAULT '{}',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_by INTEGER,
    -- Fixed-width RFC 3339 UTC, microsecond precision
    created_at TEXT NOT NULL,
    updated_by INTEGER,
    updated_at TEXT NOT NULL,

    UNIQUE(project_id, client_id)
);

CREATE INDEX IF NOT EXISTS idx_features_project_updated ON collected_features(project_id, updated_at);
CREATE INDEX IF NOT EXISTS idx_features_project_active ON collected_features(project_id, is_active);

-- One row per geometry vertex; replaced sets are kept inactive
CREATE TABLE IF NOT EXISTS collected_points (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id TEXT NOT NULL,
    feature_id INTEGER NOT NULL REFERENCES collected_features(id),
    project_id INTEGER NOT NULL REFERENCES projects(id),
    fcode TEXT NOT NULL,
    longitude REAL NOT NULL,
    latitude REAL NOT NULL,
    srid INTEGER NOT NULL DEFAULT 4326,
    attributes TEXT NOT NULL DEFAULT '{}',
    -- Replacement set number (1 = set created with the feature)
    generation INTEGER NOT NULL,
    -- Vertex position inside the set
    seq INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_by INTEGER,
    created_at TEXT NOT NULL,
    updated_by INTEGER,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_points_feature_active ON collected_points(feature_id, is_active);
CREATE INDEX IF NOT EXISTS idx_points_feature_generation ON collected_points(feature_id, generation, seq);
CREATE INDEX IF NOT EXISTS idx_points_project ON collected_points(project_id);
"#;
