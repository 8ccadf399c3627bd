//! Mutation application
//!
//! A resolved entry is first turned into a `Mutation` (pure, may fail
//! validation) and then written through the repositories on the request's
//! transaction.

use chrono::{DateTime, Utc};
use serde_json::Map;
use sqlx::SqliteConnection;

use crate::db::{
    Feature, FeatureRepository, FeatureUpdate, NewFeature, NewPoint, Point, PointRepository,
};
use crate::error::Result;
use crate::geometry::GeometryType;

use super::conflict::{Action, Written};
use super::types::{
    backfill_timezone, feature_code, FeatureChange, FeaturePayload, PointPayload, ValidationError,
};

/// A store write derived from one entry
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create {
        feature: NewFeature,
        points: Vec<NewPoint>,
    },
    Update {
        feature_id: i64,
        update: FeatureUpdate,
        /// `None` leaves the active point set untouched
        points: Option<Vec<NewPoint>>,
        /// Feature code for the kept points after a layer-only change
        restamp: Option<String>,
    },
    Deactivate {
        feature_id: i64,
    },
    Nothing(Action),
}

/// Outcome of applying one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Deactivated,
    Skipped,
    Ignored,
}

impl Applied {
    pub fn written(self) -> Option<Written> {
        match self {
            Applied::Created | Applied::Updated => Some(Written::Upserted),
            Applied::Deactivated => Some(Written::Deleted),
            Applied::Skipped | Applied::Ignored => None,
        }
    }
}

/// Applies mutations on behalf of one actor, stamping one server instant
pub struct MutationApplier<'a> {
    project_id: i64,
    actor: i64,
    now: DateTime<Utc>,
    timezone: &'a str,
}

impl<'a> MutationApplier<'a> {
    pub fn new(project_id: i64, actor: i64, now: DateTime<Utc>, timezone: &'a str) -> Self {
        Self {
            project_id,
            actor,
            now,
            timezone,
        }
    }

    /// Build the write for a resolved entry
    pub fn prepare(
        &self,
        action: Action,
        change: &FeatureChange,
        existing: Option<&Feature>,
    ) -> std::result::Result<Mutation, ValidationError> {
        match (action, existing) {
            (Action::Create, _) => self.prepare_create(change),
            (Action::UpdateIfNewer, Some(existing)) => self.prepare_update(change, existing),
            (Action::UpdateIfNewer, None) => self.prepare_create(change),
            (Action::Deactivate, Some(existing)) => Ok(Mutation::Deactivate {
                feature_id: existing.id,
            }),
            (Action::Deactivate, None) => Ok(Mutation::Nothing(Action::Ignore)),
            (other, _) => Ok(Mutation::Nothing(other)),
        }
    }

    fn prepare_create(&self, change: &FeatureChange) -> std::result::Result<Mutation, ValidationError> {
        let data = change.data.as_ref().ok_or(ValidationError::MissingData)?;
        let draw_layer = data
            .draw_layer
            .clone()
            .ok_or(ValidationError::MissingField("draw_layer"))?;
        let kind = data.feature_type.ok_or(ValidationError::MissingField("type"))?;

        let mut attributes = data.attributes.clone().unwrap_or_default();
        backfill_timezone(&mut attributes, self.timezone);

        let points = self
            .point_set(data, kind, &change.client_id, &draw_layer)?
            .unwrap_or_default();

        Ok(Mutation::Create {
            feature: NewFeature {
                client_id: change.client_id.clone(),
                project_id: self.project_id,
                draw_layer,
                feature_type: kind,
                name: data.name.clone(),
                attributes,
                actor: self.actor,
                created_at: data.created_at.unwrap_or(self.now),
                updated_at: self.now,
            },
            points,
        })
    }

    fn prepare_update(
        &self,
        change: &FeatureChange,
        existing: &Feature,
    ) -> std::result::Result<Mutation, ValidationError> {
        let data = change.data.as_ref().ok_or(ValidationError::MissingData)?;
        let draw_layer = data
            .draw_layer
            .clone()
            .unwrap_or_else(|| existing.draw_layer.clone());
        let kind = data.feature_type.unwrap_or(existing.feature_type);

        let mut attributes = data
            .attributes
            .clone()
            .unwrap_or_else(|| existing.attributes.clone());
        backfill_timezone(&mut attributes, self.timezone);

        let points = self.point_set(data, kind, &change.client_id, &draw_layer)?;
        if kind != existing.feature_type && points.is_none() {
            return Err(ValidationError::TypeChangeWithoutPoints {
                from: existing.feature_type,
                to: kind,
            });
        }

        let fcode = feature_code(&draw_layer);
        let restamp =
            (points.is_none() && fcode != feature_code(&existing.draw_layer)).then_some(fcode);

        Ok(Mutation::Update {
            feature_id: existing.id,
            update: FeatureUpdate {
                draw_layer,
                feature_type: kind,
                name: data.name.clone().or_else(|| existing.name.clone()),
                attributes,
                actor: self.actor,
                updated_at: self.now,
            },
            points,
            restamp,
        })
    }

    fn point_set(
        &self,
        data: &FeaturePayload,
        kind: GeometryType,
        client_id: &str,
        draw_layer: &str,
    ) -> std::result::Result<Option<Vec<NewPoint>>, ValidationError> {
        let Some(geometry) = data.geometry.clone() else {
            return Ok(None);
        };

        let fcode = feature_code(draw_layer);
        let points = geometry
            .into_points(kind, client_id)?
            .into_iter()
            .map(|point| self.new_point(point, &fcode))
            .collect();

        Ok(Some(points))
    }

    fn new_point(&self, point: PointPayload, fcode: &str) -> NewPoint {
        let mut attributes: Map<_, _> = point.attributes;
        backfill_timezone(&mut attributes, self.timezone);

        NewPoint {
            fcode: fcode.to_string(),
            client_id: point.client_id,
            coordinate: point.coordinate,
            attributes,
            created_at: point.created_at.unwrap_or(self.now),
        }
    }

    /// Write a prepared mutation on `conn`
    pub async fn apply(&self, conn: &mut SqliteConnection, mutation: Mutation) -> Result<Applied> {
        match mutation {
            Mutation::Create { feature, points } => {
                let created = FeatureRepository::new(&mut *conn).insert(&feature).await?;
                PointRepository::new(&mut *conn)
                    .insert_generation(created.id, self.project_id, 1, &points, self.actor, self.now)
                    .await?;
                Ok(Applied::Created)
            }
            Mutation::Update {
                feature_id,
                update,
                points,
                restamp,
            } => {
                FeatureRepository::new(&mut *conn).update(feature_id, &update).await?;
                if let Some(points) = points {
                    self.replace_points(conn, feature_id, &points).await?;
                } else if let Some(fcode) = restamp {
                    let restamped = PointRepository::new(conn)
                        .restamp_fcode(feature_id, &fcode, self.actor, self.now)
                        .await?;
                    tracing::debug!(feature_id, %fcode, restamped, "Restamped feature code");
                }
                Ok(Applied::Updated)
            }
            Mutation::Deactivate { feature_id } => {
                deactivate_feature(conn, feature_id, self.actor, self.now).await?;
                Ok(Applied::Deactivated)
            }
            Mutation::Nothing(Action::Ignore) => Ok(Applied::Ignored),
            Mutation::Nothing(_) => Ok(Applied::Skipped),
        }
    }

    /// Swap in a new point generation when the vertex sequence differs
    async fn replace_points(
        &self,
        conn: &mut SqliteConnection,
        feature_id: i64,
        points: &[NewPoint],
    ) -> Result<bool> {
        let mut repo = PointRepository::new(conn);
        let active = repo.active_for_feature(feature_id).await?;
        if !geometry_changed(points, &active) {
            return Ok(false);
        }

        repo.deactivate_active(feature_id, self.actor, self.now).await?;
        let generation = repo.next_generation(feature_id).await?;
        repo.insert_generation(feature_id, self.project_id, generation, points, self.actor, self.now)
            .await?;

        tracing::debug!(feature_id, generation, vertices = points.len(), "Replaced point set");
        Ok(true)
    }
}

/// Soft-delete a feature and cascade to its active points
pub async fn deactivate_feature(
    conn: &mut SqliteConnection,
    feature_id: i64,
    actor: i64,
    at: DateTime<Utc>,
) -> Result<u64> {
    FeatureRepository::new(&mut *conn)
        .deactivate(feature_id, actor, at)
        .await?;
    PointRepository::new(conn)
        .deactivate_active(feature_id, actor, at)
        .await
}

fn geometry_changed(incoming: &[NewPoint], active: &[Point]) -> bool {
    incoming.len() != active.len()
        || incoming
            .iter()
            .zip(active)
            .any(|(new, stored)| !new.same_vertex(stored))
}
