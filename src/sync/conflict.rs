//! Conflict resolution
//!
//! Last-writer-wins on the client's declared `lastModified` against the
//! stored `updated_at`, with soft deletes always winning.

use std::collections::HashMap;

use crate::db::Feature;

use super::types::FeatureChange;

/// What to do with one incoming entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No record with this client id exists yet
    Create,
    /// The incoming edit is newer; overwrite the stored fields
    UpdateIfNewer,
    /// The server copy is authoritative; drop the edit silently
    Skip,
    /// Soft-delete the existing record
    Deactivate,
    /// Delete of an unknown record
    Ignore,
}

/// How an entry ended up touching the store in this request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Written {
    Upserted,
    Deleted,
}

/// Client ids written so far by the current request
#[derive(Debug, Default)]
pub struct BatchLedger {
    written: HashMap<String, Written>,
}

impl BatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, client_id: &str, written: Written) {
        match self.written.get_mut(client_id) {
            // A delete stays a delete for the rest of the batch
            Some(Written::Deleted) => {}
            Some(previous) => *previous = written,
            None => {
                self.written.insert(client_id.to_string(), written);
            }
        }
    }

    pub fn get(&self, client_id: &str) -> Option<Written> {
        self.written.get(client_id).copied()
    }
}

/// Last-writer-wins resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Decide the action for `change` given the stored record, if any
    pub fn resolve(
        &self,
        change: &FeatureChange,
        existing: Option<&Feature>,
        ledger: &BatchLedger,
    ) -> Action {
        let Some(existing) = existing else {
            return if change.deleted {
                Action::Ignore
            } else {
                Action::Create
            };
        };

        if change.deleted {
            return Action::Deactivate;
        }

        match ledger.get(&change.client_id) {
            Some(Written::Deleted) => return Action::Skip,
            // Later entries of the same batch overwrite earlier ones
            Some(Written::Upserted) if existing.is_active => return Action::UpdateIfNewer,
            _ => {}
        }

        if !existing.is_active {
            return Action::Skip;
        }

        match change.last_modified {
            Some(modified) if modified > existing.updated_at => Action::UpdateIfNewer,
            _ => Action::Skip,
        }
    }
}
