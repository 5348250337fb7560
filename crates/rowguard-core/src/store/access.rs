//! Model-level access rights.
//!
//! Each [`AccessRule`] grants CRUD bits on one model, either to a single
//! group or to every principal. Grants are additive: an operation is
//! allowed as soon as any matching rule sets its bit, and denied when no
//! rule does.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};
use crate::operation::Operation;
use crate::principal::{GroupId, Principal};

/// A model-level CRUD grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Rule identifier, unique within a bundle.
    pub id: String,
    /// Target model.
    pub model: String,
    /// Granted group; `None` applies to every principal.
    #[serde(default)]
    pub group: Option<GroupId>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub unlink: bool,
}

impl AccessRule {
    /// Create a rule that grants nothing yet.
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            group: None,
            read: false,
            write: false,
            create: false,
            unlink: false,
        }
    }

    /// Restrict the rule to one group.
    pub fn for_group(mut self, group: impl Into<GroupId>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set the bit for `operation`.
    pub fn allow(mut self, operation: Operation) -> Self {
        match operation {
            Operation::Read => self.read = true,
            Operation::Write => self.write = true,
            Operation::Create => self.create = true,
            Operation::Unlink => self.unlink = true,
        }
        self
    }

    /// Set every bit.
    pub fn allow_all(self) -> Self {
        Operation::ALL.into_iter().fold(self, AccessRule::allow)
    }

    /// The bit for `operation`.
    pub fn allows(&self, operation: Operation) -> bool {
        match operation {
            Operation::Read => self.read,
            Operation::Write => self.write,
            Operation::Create => self.create,
            Operation::Unlink => self.unlink,
        }
    }

    /// Whether the rule applies to `principal`.
    pub fn applies_to(&self, principal: &Principal) -> bool {
        match &self.group {
            None => true,
            Some(group) => principal.in_group(group),
        }
    }

    /// Reject rules that cannot grant anything meaningful.
    pub fn validate(&self) -> PolicyResult<()> {
        if self.id.is_empty() {
            return Err(PolicyError::MalformedRule(
                "access rule with empty id".into(),
            ));
        }
        if self.model.is_empty() {
            return Err(PolicyError::MalformedRule(format!(
                "access rule '{}' has an empty model",
                self.id
            )));
        }
        if !Operation::ALL.into_iter().any(|op| self.allows(op)) {
            return Err(PolicyError::MalformedRule(format!(
                "access rule '{}' grants no permission",
                self.id
            )));
        }
        Ok(())
    }
}

/// Access rules indexed by model.
#[derive(Debug, Clone, Default)]
pub struct AccessRightsStore {
    by_model: HashMap<String, Vec<AccessRule>>,
}

impl AccessRightsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule by id.
    pub fn grant(&mut self, rule: AccessRule) -> PolicyResult<()> {
        rule.validate()?;
        self.revoke(&rule.id);
        self.by_model.entry(rule.model.clone()).or_default().push(rule);
        Ok(())
    }

    /// Remove a rule by id. Returns whether it existed.
    pub fn revoke(&mut self, id: &str) -> bool {
        let mut removed = false;
        for rules in self.by_model.values_mut() {
            let before = rules.len();
            rules.retain(|r| r.id != id);
            removed |= rules.len() != before;
        }
        removed
    }

    /// OR of the operation bit across every rule matching the principal.
    pub fn effective_permission(
        &self,
        principal: &Principal,
        model: &str,
        operation: Operation,
    ) -> bool {
        self.rules_for(model)
            .iter()
            .any(|r| r.allows(operation) && r.applies_to(principal))
    }

    /// Rules for one model, in insertion order.
    pub fn rules_for(&self, model: &str) -> &[AccessRule] {
        self.by_model.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_model.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
