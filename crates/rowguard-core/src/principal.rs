//! Principals and the identity provider contract.
//!
//! A principal carries an already-resolved, flat group set. Group hierarchy
//! closure is the identity provider's job; this crate only consumes the
//! result through [`GroupResolver`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PolicyResult;

/// Opaque group identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        GroupId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        GroupId(id.to_string())
    }
}

impl From<String> for GroupId {
    fn from(id: String) -> Self {
        GroupId(id)
    }
}

/// The acting identity and its resolved group set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier.
    pub id: String,
    /// Transitively closed group membership.
    #[serde(default)]
    pub groups: BTreeSet<GroupId>,
}

impl Principal {
    /// Create a principal with no groups.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            groups: BTreeSet::new(),
        }
    }

    /// Add a group.
    pub fn with_group(mut self, group: impl Into<GroupId>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Add several groups.
    pub fn with_groups<I, G>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<GroupId>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Check membership in a single group.
    pub fn in_group(&self, group: &GroupId) -> bool {
        self.groups.contains(group)
    }

    /// Check whether the principal belongs to any of `groups`.
    pub fn in_any(&self, groups: &BTreeSet<GroupId>) -> bool {
        groups.iter().any(|g| self.groups.contains(g))
    }
}

/// Identity provider contract.
pub trait GroupResolver: Send + Sync {
    /// Resolve the full, already-closed group set of a principal.
    fn resolve_groups(&self, principal: &str) -> PolicyResult<BTreeSet<GroupId>>;
}

/// Fixed principal-to-groups table. Unknown principals have no groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticGroups {
    members: HashMap<String, BTreeSet<GroupId>>,
}

impl StaticGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with<I, G>(mut self, principal: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<GroupId>,
    {
        self.members
            .entry(principal.into())
            .or_default()
            .extend(groups.into_iter().map(Into::into));
        self
    }
}

impl GroupResolver for StaticGroups {
    fn resolve_groups(&self, principal: &str) -> PolicyResult<BTreeSet<GroupId>> {
        Ok(self.members.get(principal).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_groups() {
        let p = Principal::new("alice").with_groups(["editors", "sales"]);
        assert!(p.in_group(&GroupId::from("editors")));
        assert!(!p.in_group(&GroupId::from("hr")));

        let wanted: BTreeSet<GroupId> = ["hr", "sales"].into_iter().map(GroupId::from).collect();
        assert!(p.in_any(&wanted));
        assert!(!p.in_any(&BTreeSet::new()));
    }

    #[test]
    fn test_static_groups() {
        let groups = StaticGroups::new()
            .with("alice", ["editors"])
            .with("alice", ["viewers"]);
        let resolved = groups.resolve_groups("alice").unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(groups.resolve_groups("mallory").unwrap().is_empty());
    }
}
