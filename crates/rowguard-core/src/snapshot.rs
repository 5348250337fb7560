//! Immutable policy snapshots.

use crate::catalog::ModelCatalog;
use crate::store::{AccessRightsStore, FieldGrantStore, RecordRuleStore};

/// One published generation of compiled policy.
///
/// Snapshots are never mutated after compilation. The engine publishes a
/// new one on every reload and readers keep whichever they loaded.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    pub(crate) generation: u64,
    pub(crate) catalog: ModelCatalog,
    pub(crate) access: AccessRightsStore,
    pub(crate) record_rules: RecordRuleStore,
    pub(crate) field_grants: FieldGrantStore,
}

impl PolicySnapshot {
    /// The empty generation-zero snapshot. Denies everything.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn access(&self) -> &AccessRightsStore {
        &self.access
    }

    pub fn record_rules(&self) -> &RecordRuleStore {
        &self.record_rules
    }

    pub fn field_grants(&self) -> &FieldGrantStore {
        &self.field_grants
    }
}
