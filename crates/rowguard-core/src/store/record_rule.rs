//! Row-level record rules.
//!
//! Record rules restrict which records an operation may touch. Rules with
//! no groups are global and act as mandatory floors: every one of them must
//! hold. Group-scoped rules are alternative grants: when any apply to the
//! principal, at least one of them must hold.

use std::collections::BTreeSet;
use std::sync::Arc;

use rowguard_domain::{DomainEvaluator, DomainExpr, RecordId, RecordProvider, RecordView};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{PolicyError, PolicyResult};
use crate::operation::Operation;
use crate::principal::{GroupId, Principal};

fn default_active() -> bool {
    true
}

/// A record rule row as it appears in a policy bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRuleDef {
    /// Rule identifier, unique within a bundle.
    pub id: String,
    /// Target model.
    pub model: String,
    /// Groups the rule is scoped to. Empty means global.
    #[serde(default)]
    pub groups: BTreeSet<GroupId>,
    /// Operations the rule applies to. Empty means all of them.
    #[serde(default)]
    pub operations: BTreeSet<Operation>,
    /// Domain expression source.
    pub domain: String,
    /// Inactive rules are kept but never applied.
    #[serde(default = "default_active")]
    pub active: bool,
}

impl RecordRuleDef {
    /// Create an active global rule applying to every operation.
    pub fn new(id: impl Into<String>, model: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            groups: BTreeSet::new(),
            operations: BTreeSet::new(),
            domain: domain.into(),
            active: true,
        }
    }

    /// Scope the rule to a group.
    pub fn for_group(mut self, group: impl Into<GroupId>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Restrict the rule to an operation.
    pub fn on(mut self, operation: Operation) -> Self {
        self.operations.insert(operation);
        self
    }

    /// Mark the rule inactive.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A record rule with its domain parsed.
#[derive(Debug, Clone)]
pub struct RecordRule {
    pub id: String,
    pub model: String,
    pub groups: BTreeSet<GroupId>,
    pub operations: BTreeSet<Operation>,
    pub domain: Arc<DomainExpr>,
    pub active: bool,
}

impl RecordRule {
    /// Attach a parsed domain to a rule row.
    pub fn compile(def: &RecordRuleDef, domain: Arc<DomainExpr>) -> PolicyResult<Self> {
        if def.id.is_empty() {
            return Err(PolicyError::MalformedRule("record rule with empty id".into()));
        }
        if def.model.is_empty() {
            return Err(PolicyError::MalformedRule(format!(
                "record rule '{}' has an empty model",
                def.id
            )));
        }
        let operations = if def.operations.is_empty() {
            Operation::ALL.into_iter().collect()
        } else {
            def.operations.clone()
        };
        Ok(Self {
            id: def.id.clone(),
            model: def.model.clone(),
            groups: def.groups.clone(),
            operations,
            domain,
            active: def.active,
        })
    }

    pub fn is_global(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn applies_to(&self, operation: Operation) -> bool {
        self.active && self.operations.contains(&operation)
    }
}

/// The rules that apply to one (principal, model, operation) triple.
struct Applicable<'a> {
    global: Vec<&'a RecordRule>,
    scoped: Vec<&'a RecordRule>,
}

impl Applicable<'_> {
    fn passes(&self, view: &RecordView<'_>, model: &str) -> PolicyResult<bool> {
        for rule in &self.global {
            if !Self::holds(rule, view, model)? {
                trace!(rule = %rule.id, record = %view.id(), "global rule failed");
                return Ok(false);
            }
        }

        if self.scoped.is_empty() {
            return Ok(true);
        }
        for rule in &self.scoped {
            if Self::holds(rule, view, model)? {
                return Ok(true);
            }
        }
        trace!(record = %view.id(), "no group rule matched");
        Ok(false)
    }

    fn holds(rule: &RecordRule, view: &RecordView<'_>, model: &str) -> PolicyResult<bool> {
        DomainEvaluator::evaluate(&rule.domain, view).map_err(|e| PolicyError::from_eval(e, model))
    }
}

/// Record rules for every model.
#[derive(Debug, Clone, Default)]
pub struct RecordRuleStore {
    rules: Vec<RecordRule>,
}

impl RecordRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule by id.
    pub fn insert(&mut self, rule: RecordRule) {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    /// Rules for one model, in insertion order.
    pub fn rules_for<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a RecordRule> + 'a {
        self.rules.iter().filter(move |r| r.model == model)
    }

    fn applicable<'a>(
        &'a self,
        principal: &Principal,
        model: &str,
        operation: Operation,
    ) -> Applicable<'a> {
        let mut global = Vec::new();
        let mut scoped = Vec::new();
        for rule in self.rules.iter().filter(|r| r.model == model && r.applies_to(operation)) {
            if rule.is_global() {
                global.push(rule);
            } else if principal.in_any(&rule.groups) {
                scoped.push(rule);
            }
        }
        Applicable { global, scoped }
    }

    /// Keep the records that pass the rules for `operation`, in input order.
    pub fn filter_allowed(
        &self,
        principal: &Principal,
        model: &str,
        operation: Operation,
        records: &[RecordId],
        provider: &dyn RecordProvider,
    ) -> PolicyResult<Vec<RecordId>> {
        let applicable = self.applicable(principal, model, operation);
        if applicable.global.is_empty() && applicable.scoped.is_empty() {
            return Ok(records.to_vec());
        }

        let mut allowed = Vec::with_capacity(records.len());
        for &id in records {
            if applicable.passes(&RecordView::new(id, provider), model)? {
                allowed.push(id);
            }
        }
        Ok(allowed)
    }

    /// Check a single record.
    pub fn allows(
        &self,
        principal: &Principal,
        model: &str,
        operation: Operation,
        record: RecordId,
        provider: &dyn RecordProvider,
    ) -> PolicyResult<bool> {
        self.applicable(principal, model, operation)
            .passes(&RecordView::new(record, provider), model)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
