//! Sync orchestration
//!
//! One request runs `Received → Validated → Applying → Extracting` and ends in
//! `Committed` or `RolledBack`. All writes and the change-set read share one
//! transaction; dropping it without commit discards the batch.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use sqlx::SqlitePool;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::SyncSettings;
use crate::db::{FeatureRepository, PointRepository, ProjectLookup};
use crate::error::{AppError, Result};
use crate::timestamp;

use super::apply::{deactivate_feature, Applied, MutationApplier};
use super::changes::ChangeSetExtractor;
use super::conflict::{Action, BatchLedger, ConflictResolver};
use super::types::{client_id_of, pushed_ids, FeatureChange, SyncRequest, SyncResponse};
use super::web::{
    server_feature, web_change, web_client_id, FeatureEdit, WebSyncRequest, WebSyncResponse,
};

/// Orchestrator phases, logged as a request moves through them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Received,
    Validated,
    Applying,
    Extracting,
    Committed,
    RolledBack,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Received => "received",
            SyncPhase::Validated => "validated",
            SyncPhase::Applying => "applying",
            SyncPhase::Extracting => "extracting",
            SyncPhase::Committed => "committed",
            SyncPhase::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

fn enter(phase: SyncPhase) {
    tracing::debug!(%phase, "Sync phase");
}

/// Per-project sync coordinator
pub struct SyncService {
    pool: SqlitePool,
    projects: Arc<dyn ProjectLookup>,
    settings: SyncSettings,
}

impl SyncService {
    pub fn new(pool: SqlitePool, projects: Arc<dyn ProjectLookup>, settings: SyncSettings) -> Self {
        Self {
            pool,
            projects,
            settings,
        }
    }

    /// Push the client's batch and pull the server's changes in one round trip
    pub async fn sync(&self, project_id: i64, actor: i64, body: Value) -> Result<SyncResponse> {
        let span = tracing::info_span!(
            "sync",
            request_id = %Uuid::new_v4(),
            project_id,
            actor,
            features = tracing::field::Empty
        );

        self.sync_inner(project_id, actor, body).instrument(span).await
    }

    async fn sync_inner(&self, project_id: i64, actor: i64, body: Value) -> Result<SyncResponse> {
        enter(SyncPhase::Received);
        let request = SyncRequest::from_value(body, &self.settings.default_timezone)?;
        tracing::Span::current().record("features", request.features.len());

        self.ensure_project(project_id).await?;
        enter(SyncPhase::Validated);

        match self.bounded(self.run(project_id, actor, request)).await {
            Ok(response) => {
                enter(SyncPhase::Committed);
                tracing::info!(
                    processed = response.processed.len(),
                    failed = response.failed.len(),
                    changes = response.changes.len(),
                    "Sync committed"
                );
                Ok(response)
            }
            Err(e) => {
                enter(SyncPhase::RolledBack);
                Err(e)
            }
        }
    }

    /// Run `work` under the configured deadline; an expired deadline drops its transaction
    async fn bounded<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.settings.timeout();
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "sync did not finish within {}s",
                limit.as_secs()
            ))),
        }
    }

    async fn run(&self, project_id: i64, actor: i64, request: SyncRequest) -> Result<SyncResponse> {
        let now = timestamp::server_now();
        let mut tx = self.pool.begin().await?;

        let resolver = ConflictResolver::new();
        let applier = MutationApplier::new(project_id, actor, now, &request.timezone);
        let mut ledger = BatchLedger::new();
        let mut report = BatchReport::default();

        enter(SyncPhase::Applying);
        for (index, entry) in request.features.iter().enumerate() {
            let Some(client_id) = client_id_of(entry) else {
                tracing::warn!(index, "Dropping feature entry without clientId");
                continue;
            };

            let change = match FeatureChange::parse(client_id, entry) {
                Ok(change) => change,
                Err(e) => {
                    tracing::warn!(client_id, error = %e, "Rejected feature entry");
                    report.failed(client_id);
                    continue;
                }
            };

            let existing = FeatureRepository::new(&mut *tx)
                .find_by_client_id(project_id, client_id)
                .await?;
            let action = resolver.resolve(&change, existing.as_ref(), &ledger);

            let mutation = match applier.prepare(action, &change, existing.as_ref()) {
                Ok(mutation) => mutation,
                Err(e) => {
                    tracing::warn!(client_id, error = %e, "Rejected feature entry");
                    report.failed(client_id);
                    continue;
                }
            };

            let applied = applier.apply(&mut *tx, mutation).await?;
            tracing::debug!(client_id, ?action, ?applied, "Feature resolved");

            if let Some(written) = applied.written() {
                ledger.record(client_id, written);
            }
            if applied != Applied::Ignored {
                report.processed(client_id);
            }
        }

        enter(SyncPhase::Extracting);
        let pushed = pushed_ids(&request.features, client_id_of);
        let changes = ChangeSetExtractor::new(project_id)
            .extract(&mut *tx, request.last_sync, &pushed)
            .await?;

        tx.commit().await?;

        Ok(SyncResponse {
            success: true,
            processed: report.processed,
            failed: report.failed,
            changes,
            server_timestamp: timestamp::format(&now),
        })
    }

    /// Push manually drawn features from the web editor and pull what changed
    pub async fn web_sync(
        &self,
        project_id: i64,
        actor: i64,
        body: Value,
    ) -> Result<WebSyncResponse> {
        let span = tracing::info_span!(
            "web_sync",
            request_id = %Uuid::new_v4(),
            project_id,
            actor
        );

        async move {
            let request = WebSyncRequest::from_value(body, &self.settings.default_timezone)?;
            self.ensure_project(project_id).await?;

            let response = self.bounded(self.run_web(project_id, actor, request)).await?;
            tracing::info!(
                synced = response.synced_ids.len(),
                server_features = response.server_features.len(),
                "Web sync committed"
            );
            Ok(response)
        }
        .instrument(span)
        .await
    }

    async fn run_web(
        &self,
        project_id: i64,
        actor: i64,
        request: WebSyncRequest,
    ) -> Result<WebSyncResponse> {
        let now = timestamp::server_now();
        let mut tx = self.pool.begin().await?;
        let applier = MutationApplier::new(project_id, actor, now, &request.timezone);
        let mut synced_ids = Vec::new();

        for (index, entry) in request.features.iter().enumerate() {
            let Some(client_id) = web_client_id(entry) else {
                tracing::warn!(index, "Dropping web feature without client_id");
                continue;
            };

            let change = match web_change(client_id, entry, now) {
                Ok(change) => change,
                Err(e) => {
                    tracing::warn!(client_id, error = %e, "Rejected web feature");
                    continue;
                }
            };

            let existing = FeatureRepository::new(&mut *tx)
                .find_by_client_id(project_id, client_id)
                .await?;
            // Editor writes overwrite without a timestamp contest but never revive a deleted feature
            let action = match &existing {
                None => Action::Create,
                Some(feature) if feature.is_active => Action::UpdateIfNewer,
                Some(_) => Action::Skip,
            };

            let mutation = match applier.prepare(action, &change, existing.as_ref()) {
                Ok(mutation) => mutation,
                Err(e) => {
                    tracing::warn!(client_id, error = %e, "Rejected web feature");
                    continue;
                }
            };

            if applier.apply(&mut *tx, mutation).await?.written().is_some() {
                push_unique(&mut synced_ids, client_id);
            }
        }

        let mut server_features = Vec::new();
        if let Some(cursor) = request.last_sync {
            let pushed = pushed_ids(&request.features, web_client_id);
            let features = FeatureRepository::new(&mut *tx)
                .changed_since(project_id, cursor, &pushed)
                .await?;

            for feature in features.iter().filter(|f| f.is_active) {
                let points = PointRepository::new(&mut *tx)
                    .active_for_feature(feature.id)
                    .await?;
                server_features.extend(server_feature(feature, &points));
            }
        }

        tx.commit().await?;

        Ok(WebSyncResponse {
            success: true,
            synced_ids,
            server_features,
            server_time: timestamp::format(&now),
        })
    }

    /// Web edit of one feature's name, layer, type or geometry
    ///
    /// New coordinates retire the active points and append a fresh generation.
    pub async fn edit_feature(
        &self,
        project_id: i64,
        client_id: &str,
        actor: i64,
        body: &Value,
    ) -> Result<String> {
        let edit = FeatureEdit::from_value(body)?;
        self.ensure_project(project_id).await?;

        let now = timestamp::server_now();
        let mut tx = self.pool.begin().await?;

        let existing = FeatureRepository::new(&mut *tx)
            .find_by_client_id(project_id, client_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Feature {} not found", client_id)))?;
        if !existing.is_active {
            return Err(AppError::BadRequest(format!("Feature {} is inactive", client_id)));
        }

        let change = edit.into_change(&existing);
        let applier = MutationApplier::new(project_id, actor, now, existing.timezone());
        let mutation = applier
            .prepare(Action::UpdateIfNewer, &change, Some(&existing))
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        applier.apply(&mut *tx, mutation).await?;
        tx.commit().await?;

        tracing::info!(project_id, client_id, actor, "Feature edited");
        Ok(timestamp::format(&now))
    }

    /// Web-client soft delete of one feature (cascades to its points)
    pub async fn inactivate(&self, project_id: i64, client_id: &str, actor: i64) -> Result<String> {
        self.ensure_project(project_id).await?;

        let now = timestamp::server_now();
        let mut tx = self.pool.begin().await?;

        let feature = FeatureRepository::new(&mut *tx)
            .find_by_client_id(project_id, client_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Feature {} not found", client_id)))?;

        let points = deactivate_feature(&mut *tx, feature.id, actor, now).await?;
        tx.commit().await?;

        tracing::info!(project_id, client_id, actor, points, "Feature inactivated");
        Ok(timestamp::format(&now))
    }

    async fn ensure_project(&self, project_id: i64) -> Result<()> {
        if self.projects.exists(project_id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Project {} not found", project_id)))
        }
    }
}

/// Per-id outcome of a batch
///
/// An id sits in exactly one list, decided by its last entry in the batch.
/// Deletes of unknown records are reported in neither.
#[derive(Debug, Default)]
struct BatchReport {
    processed: Vec<String>,
    failed: Vec<String>,
}

impl BatchReport {
    fn processed(&mut self, client_id: &str) {
        self.failed.retain(|id| id != client_id);
        push_unique(&mut self.processed, client_id);
    }

    fn failed(&mut self, client_id: &str) {
        self.processed.retain(|id| id != client_id);
        push_unique(&mut self.failed, client_id);
    }
}

fn push_unique(list: &mut Vec<String>, client_id: &str) {
    if !list.iter().any(|id| id == client_id) {
        list.push(client_id.to_string());
    }
}
