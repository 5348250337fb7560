//! Record provider contract and an in-memory implementation.
//!
//! The evaluator never owns record data. Field values, relational hops and
//! hierarchy walks are all delegated to a [`RecordProvider`] supplied by the
//! storage layer.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ast::FieldPath;
use crate::error::{EvalError, ProviderError};
use crate::value::{RecordId, Value};

/// Source of record field values.
pub trait RecordProvider: Send + Sync {
    /// Read a field value on a record.
    fn get_field(&self, record: RecordId, field: &str) -> Result<Value, ProviderError>;

    /// Follow a many-to-one field. `Ok(None)` means the relation is empty.
    fn resolve_relation(&self, record: RecordId, field: &str)
        -> Result<Option<RecordId>, ProviderError>;

    /// Ancestors of the record referenced by `record.field`, nearest first,
    /// excluding the referenced record itself.
    fn ancestors_of(&self, record: RecordId, field: &str) -> Result<Vec<RecordId>, ProviderError>;
}

/// A read-only view of one record through a provider.
#[derive(Clone, Copy)]
pub struct RecordView<'a> {
    id: RecordId,
    provider: &'a dyn RecordProvider,
}

/// Where a field path ends up after following its relational hops.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// The final record and the value of the final field on it.
    Field { record: RecordId, value: Value },
    /// A relation along the path was empty.
    Broken,
}

impl<'a> RecordView<'a> {
    pub fn new(id: RecordId, provider: &'a dyn RecordProvider) -> Self {
        Self { id, provider }
    }

    /// Identity of the viewed record.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// The provider behind this view.
    pub fn provider(&self) -> &'a dyn RecordProvider {
        self.provider
    }

    /// Resolve a field path, following each relational hop in turn.
    pub fn resolve(&self, path: &FieldPath) -> Result<Resolved, EvalError> {
        let mut current = self.id;
        for hop in path.hops() {
            match self
                .provider
                .resolve_relation(current, hop)
                .map_err(|e| EvalError::from_provider(e, &path.to_string(), self.id))?
            {
                Some(next) => current = next,
                None => return Ok(Resolved::Broken),
            }
        }

        let value = self
            .provider
            .get_field(current, path.last())
            .map_err(|e| EvalError::from_provider(e, &path.to_string(), self.id))?;

        Ok(Resolved::Field {
            record: current,
            value,
        })
    }
}

/// One record held by [`MemoryRecords`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Record identity.
    pub id: RecordId,
    /// Parent in the record hierarchy, used by `child_of`.
    #[serde(default)]
    pub parent: Option<RecordId>,
    /// Field values. Relational fields hold `Value::Ref`.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl MemoryRecord {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            fields: BTreeMap::new(),
        }
    }

    /// Set a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set the hierarchy parent.
    pub fn with_parent(mut self, parent: impl Into<RecordId>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// In-memory record provider. Record ids are unique across models.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecords {
    records: HashMap<RecordId, MemoryRecord>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&mut self, record: MemoryRecord) {
        self.records.insert(record.id, record);
    }

    /// Builder-style insert.
    pub fn with(mut self, record: MemoryRecord) -> Self {
        self.insert(record);
        self
    }

    /// Look up a record.
    pub fn get(&self, id: RecordId) -> Option<&MemoryRecord> {
        self.records.get(&id)
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record(&self, id: RecordId) -> Result<&MemoryRecord, ProviderError> {
        self.records.get(&id).ok_or(ProviderError::UnknownRecord(id))
    }
}

impl FromIterator<MemoryRecord> for MemoryRecords {
    fn from_iter<I: IntoIterator<Item = MemoryRecord>>(iter: I) -> Self {
        let mut records = MemoryRecords::new();
        for record in iter {
            records.insert(record);
        }
        records
    }
}

impl RecordProvider for MemoryRecords {
    fn get_field(&self, record: RecordId, field: &str) -> Result<Value, ProviderError> {
        let rec = self.record(record)?;
        if field == "id" {
            return Ok(Value::Ref(rec.id));
        }
        rec.fields
            .get(field)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownField {
                record,
                field: field.to_string(),
            })
    }

    fn resolve_relation(
        &self,
        record: RecordId,
        field: &str,
    ) -> Result<Option<RecordId>, ProviderError> {
        match self.get_field(record, field)? {
            Value::Ref(id) => Ok(Some(id)),
            Value::Null => Ok(None),
            _ => Err(ProviderError::NotRelational {
                record,
                field: field.to_string(),
            }),
        }
    }

    fn ancestors_of(&self, record: RecordId, field: &str) -> Result<Vec<RecordId>, ProviderError> {
        let Some(start) = self.resolve_relation(record, field)? else {
            return Ok(Vec::new());
        };

        let mut ancestors = Vec::new();
        let mut seen = HashSet::from([start]);
        let mut current = self.record(start)?.parent;
        while let Some(id) = current {
            if !seen.insert(id) {
                // Cyclic hierarchy; stop at the first repeat.
                break;
            }
            ancestors.push(id);
            current = self.records.get(&id).and_then(|r| r.parent);
        }
        Ok(ancestors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company_tree() -> MemoryRecords {
        // 1 <- 2 <- 3 ; employee 10 works for company 3
        MemoryRecords::new()
            .with(MemoryRecord::new(1).with_field("name", "Holding"))
            .with(MemoryRecord::new(2).with_parent(1).with_field("name", "Europe"))
            .with(MemoryRecord::new(3).with_parent(2).with_field("name", "Paris"))
            .with(
                MemoryRecord::new(10)
                    .with_field("company", RecordId(3))
                    .with_field("manager", Value::Null)
                    .with_field("name", "Ada"),
            )
    }

    #[test]
    fn test_get_field_and_id() {
        let records = company_tree();
        assert_eq!(records.get_field(RecordId(10), "name").unwrap(), Value::from("Ada"));
        assert_eq!(records.get_field(RecordId(10), "id").unwrap(), Value::Ref(RecordId(10)));
        assert!(matches!(
            records.get_field(RecordId(10), "salary"),
            Err(ProviderError::UnknownField { .. })
        ));
        assert!(matches!(
            records.get_field(RecordId(99), "name"),
            Err(ProviderError::UnknownRecord(RecordId(99)))
        ));
    }

    #[test]
    fn test_resolve_relation() {
        let records = company_tree();
        assert_eq!(
            records.resolve_relation(RecordId(10), "company").unwrap(),
            Some(RecordId(3))
        );
        assert_eq!(records.resolve_relation(RecordId(10), "manager").unwrap(), None);
        assert!(matches!(
            records.resolve_relation(RecordId(10), "name"),
            Err(ProviderError::NotRelational { .. })
        ));
    }

    #[test]
    fn test_ancestors_of_walks_parents() {
        let records = company_tree();
        assert_eq!(
            records.ancestors_of(RecordId(10), "company").unwrap(),
            vec![RecordId(2), RecordId(1)]
        );
        assert!(records.ancestors_of(RecordId(10), "manager").unwrap().is_empty());
    }

    #[test]
    fn test_ancestors_of_stops_on_cycle() {
        let records = MemoryRecords::new()
            .with(MemoryRecord::new(1).with_parent(2))
            .with(MemoryRecord::new(2).with_parent(1))
            .with(MemoryRecord::new(5).with_field("node", RecordId(1)));
        assert_eq!(records.ancestors_of(RecordId(5), "node").unwrap(), vec![RecordId(2)]);
    }

    #[test]
    fn test_record_view_resolves_one_hop() {
        let records = company_tree();
        let view = RecordView::new(RecordId(10), &records);

        let resolved = view.resolve(&FieldPath::from("company.name")).unwrap();
        assert_eq!(
            resolved,
            Resolved::Field {
                record: RecordId(3),
                value: Value::from("Paris"),
            }
        );
        assert_eq!(
            view.resolve(&FieldPath::from("manager.name")).unwrap(),
            Resolved::Broken
        );
    }

    #[test]
    fn test_record_view_unknown_field() {
        let records = company_tree();
        let view = RecordView::new(RecordId(10), &records);
        let err = view.resolve(&FieldPath::from("company.phone")).unwrap_err();
        assert_eq!(
            err,
            EvalError::UnknownField {
                path: "company.phone".into(),
                record: RecordId(10),
            }
        );
    }
}
