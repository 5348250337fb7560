//! Policy bundles: the bulk import unit.
//!
//! A bundle carries the model catalog and every rule row. Compiling a
//! bundle validates all of it and yields a [`PolicySnapshot`]; a single bad
//! row rejects the whole bundle.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::DomainCache;
use crate::catalog::{ModelCatalog, ModelDef};
use crate::error::{PolicyError, PolicyResult};
use crate::snapshot::PolicySnapshot;
use crate::store::{
    AccessRightsStore, AccessRule, FieldGrant, FieldGrantStore, RecordRule, RecordRuleDef,
    RecordRuleStore,
};

/// Every model, rule and grant of one policy generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBundle {
    #[serde(default)]
    pub models: Vec<ModelDef>,
    #[serde(default)]
    pub access_rules: Vec<AccessRule>,
    #[serde(default)]
    pub record_rules: Vec<RecordRuleDef>,
    #[serde(default)]
    pub field_grants: Vec<FieldGrant>,
}

impl PolicyBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_access_rule(mut self, rule: AccessRule) -> Self {
        self.access_rules.push(rule);
        self
    }

    pub fn with_record_rule(mut self, rule: RecordRuleDef) -> Self {
        self.record_rules.push(rule);
        self
    }

    pub fn with_field_grant(mut self, grant: FieldGrant) -> Self {
        self.field_grants.push(grant);
        self
    }

    /// Parse a bundle from JSON text.
    pub fn from_json(json: &str) -> PolicyResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a bundle from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> PolicyResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate every row and build the snapshot for `generation`.
    pub fn compile(&self, generation: u64, cache: &DomainCache) -> PolicyResult<PolicySnapshot> {
        self.compile_inner(generation, cache).inspect_err(|err| {
            warn!(generation, error = %err, "policy bundle rejected");
        })
    }

    fn compile_inner(&self, generation: u64, cache: &DomainCache) -> PolicyResult<PolicySnapshot> {
        let catalog = ModelCatalog::from_models(self.models.iter().cloned())?;

        let mut access = AccessRightsStore::new();
        let mut ids = HashSet::new();
        for rule in &self.access_rules {
            if !ids.insert(rule.id.as_str()) {
                return Err(PolicyError::MalformedRule(format!(
                    "duplicate access rule id '{}'",
                    rule.id
                )));
            }
            rule.validate()?;
            catalog.model(&rule.model)?;
            access.grant(rule.clone())?;
        }

        let mut record_rules = RecordRuleStore::new();
        let mut ids = HashSet::new();
        for def in &self.record_rules {
            if !ids.insert(def.id.as_str()) {
                return Err(PolicyError::MalformedRule(format!(
                    "duplicate record rule id '{}'",
                    def.id
                )));
            }
            let domain = cache
                .get_or_parse(&def.domain, generation)
                .map_err(|source| PolicyError::MalformedDomain {
                    rule: def.id.clone(),
                    source,
                })?;
            let rule = RecordRule::compile(def, domain)?;
            catalog.validate_domain(&rule.model, &rule.domain)?;
            record_rules.insert(rule);
        }

        let mut field_grants = FieldGrantStore::new();
        for grant in &self.field_grants {
            let model = catalog.model(&grant.model)?;
            if !model.has_field(&grant.field) {
                return Err(PolicyError::UnknownField {
                    model: grant.model.clone(),
                    field: grant.field.clone(),
                });
            }
            field_grants.insert(grant.clone())?;
        }

        Ok(PolicySnapshot {
            generation,
            catalog,
            access,
            record_rules,
            field_grants,
        })
    }
}
