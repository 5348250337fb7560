//! Field-level read and write restrictions.
//!
//! Restriction is opt-in: a field with no grant, or a grant whose group
//! set is empty, is unrestricted for that direction.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PolicyError, PolicyResult};
use crate::principal::{GroupId, Principal};

/// Per-field read/write group restriction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGrant {
    pub model: String,
    pub field: String,
    /// Groups allowed to read. Empty means unrestricted.
    #[serde(default)]
    pub read_groups: BTreeSet<GroupId>,
    /// Groups allowed to write. Empty means unrestricted.
    #[serde(default)]
    pub write_groups: BTreeSet<GroupId>,
}

impl FieldGrant {
    pub fn new(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            field: field.into(),
            read_groups: BTreeSet::new(),
            write_groups: BTreeSet::new(),
        }
    }

    pub fn read_by(mut self, group: impl Into<GroupId>) -> Self {
        self.read_groups.insert(group.into());
        self
    }

    pub fn written_by(mut self, group: impl Into<GroupId>) -> Self {
        self.write_groups.insert(group.into());
        self
    }

    pub fn can_read(&self, principal: &Principal) -> bool {
        self.read_groups.is_empty() || principal.in_any(&self.read_groups)
    }

    pub fn can_write(&self, principal: &Principal) -> bool {
        self.write_groups.is_empty() || principal.in_any(&self.write_groups)
    }
}

/// Field grants keyed by (model, field).
#[derive(Debug, Clone, Default)]
pub struct FieldGrantStore {
    grants: HashMap<(String, String), FieldGrant>,
}

impl FieldGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a grant. A second grant for the same field is rejected.
    pub fn insert(&mut self, grant: FieldGrant) -> PolicyResult<()> {
        if grant.model.is_empty() || grant.field.is_empty() {
            return Err(PolicyError::MalformedRule(
                "field grant needs a model and a field".into(),
            ));
        }
        let key = (grant.model.clone(), grant.field.clone());
        if self.grants.contains_key(&key) {
            return Err(PolicyError::MalformedRule(format!(
                "duplicate field grant for '{}.{}'",
                grant.model, grant.field
            )));
        }
        self.grants.insert(key, grant);
        Ok(())
    }

    pub fn get(&self, model: &str, field: &str) -> Option<&FieldGrant> {
        self.grants.get(&(model.to_string(), field.to_string()))
    }

    /// Whether the principal may read `model.field`.
    pub fn can_read(&self, principal: &Principal, model: &str, field: &str) -> bool {
        self.get(model, field).map_or(true, |g| g.can_read(principal))
    }

    /// The subset of `fields` the principal may read.
    pub fn visible_fields<'a, I>(&self, principal: &Principal, model: &str, fields: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        fields
            .into_iter()
            .filter(|f| self.can_read(principal, model, f))
            .map(str::to_string)
            .collect()
    }

    /// Fail on the first field, in the given order, the principal may not write.
    pub fn assert_writable<'a, I>(&self, principal: &Principal, model: &str, fields: I) -> PolicyResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for field in fields {
            if let Some(grant) = self.get(model, field) {
                if !grant.can_write(principal) {
                    debug!(principal = %principal.id, model, field, "field write denied");
                    return Err(PolicyError::FieldWriteDenied {
                        model: model.to_string(),
                        field: field.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Grants for one model.
    pub fn grants_for<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a FieldGrant> + 'a {
        self.grants.values().filter(move |g| g.model == model)
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FieldGrantStore {
        let mut store = FieldGrantStore::new();
        store
            .insert(FieldGrant::new("employee", "salary").read_by("hr").written_by("payroll"))
            .unwrap();
        store.insert(FieldGrant::new("employee", "notes")).unwrap();
        store
    }

    #[test]
    fn test_visible_fields_masks_restricted() {
        let store = store();
        let clerk = Principal::new("c").with_group("sales");
        let visible = store.visible_fields(&clerk, "employee", ["name", "salary", "notes"]);
        assert_eq!(
            visible,
            ["name", "notes"].into_iter().map(String::from).collect::<BTreeSet<_>>()
        );

        let hr = Principal::new("h").with_group("hr");
        assert!(store.visible_fields(&hr, "employee", ["salary"]).contains("salary"));
    }

    #[test]
    fn test_assert_writable_reports_first_denied_field() {
        let store = store();
        let hr = Principal::new("h").with_group("hr");
        let err = store
            .assert_writable(&hr, "employee", ["name", "salary"])
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyError::FieldWriteDenied { ref field, .. } if field == "salary"
        ));

        let payroll = Principal::new("p").with_group("payroll");
        store.assert_writable(&payroll, "employee", ["name", "salary"]).unwrap();
    }

    #[test]
    fn test_duplicate_grant_is_rejected() {
        let mut store = store();
        let err = store.insert(FieldGrant::new("employee", "salary")).unwrap_err();
        assert!(matches!(err, PolicyError::MalformedRule(_)));
    }
}
