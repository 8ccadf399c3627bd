//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{ProjectLookup, SqliteProjectLookup};
use crate::identity::{HeaderIdentity, IdentityProvider};
use crate::sync::SyncService;

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid identity header: {0}")]
    IdentityHeader(#[from] axum::http::header::InvalidHeaderName),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    projects: Arc<dyn ProjectLookup>,
    identity: Arc<dyn IdentityProvider>,
    sync: SyncService,
}

impl AppState {
    /// Wire the default collaborators: SQLite project lookup and header identity
    pub fn new(config: Config, db: SqlitePool) -> Result<Self, StateError> {
        let projects: Arc<dyn ProjectLookup> = Arc::new(SqliteProjectLookup::new(db.clone()));
        let identity: Arc<dyn IdentityProvider> =
            Arc::new(HeaderIdentity::new(&config.identity.header)?);

        Ok(Self::with_collaborators(config, db, projects, identity))
    }

    /// Build state around caller-supplied collaborators
    pub fn with_collaborators(
        config: Config,
        db: SqlitePool,
        projects: Arc<dyn ProjectLookup>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let sync = SyncService::new(db.clone(), projects.clone(), config.sync.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                projects,
                identity,
                sync,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Get the project lookup
    pub fn projects(&self) -> &dyn ProjectLookup {
        self.inner.projects.as_ref()
    }

    /// Get the identity provider
    pub fn identity(&self) -> &dyn IdentityProvider {
        self.inner.identity.as_ref()
    }

    /// Get the sync orchestrator
    pub fn sync(&self) -> &SyncService {
        &self.inner.sync
    }
}
