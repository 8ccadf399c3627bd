//! Project lookups

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::timestamp;

/// Project record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub created_at: String,
}

/// Project lookup collaborator used by sync and the feature views
#[async_trait]
pub trait ProjectLookup: Send + Sync {
    /// Whether the project exists (and may receive sync traffic)
    async fn exists(&self, project_id: i64) -> Result<bool>;
}

/// Project repository
pub struct ProjectRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ProjectRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a project
    pub async fn create(&self, name: &str) -> Result<Project> {
        let now = timestamp::format(&Utc::now());

        let result = sqlx::query("INSERT INTO projects (name, is_active, created_at) VALUES (?, 1, ?)")
            .bind(name)
            .bind(&now)
            .execute(self.pool)
            .await?;

        Ok(Project {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            is_active: true,
            created_at: now,
        })
    }

    /// Get a project by id
    pub async fn get(&self, id: i64) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            "SELECT id, name, is_active, created_at FROM projects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(project)
    }
}

/// `ProjectLookup` backed by the `projects` table
#[derive(Clone)]
pub struct SqliteProjectLookup {
    pool: SqlitePool,
}

impl SqliteProjectLookup {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectLookup for SqliteProjectLookup {
    async fn exists(&self, project_id: i64) -> Result<bool> {
        let project = ProjectRepository::new(&self.pool).get(project_id).await?;
        Ok(project.is_some())
    }
}
