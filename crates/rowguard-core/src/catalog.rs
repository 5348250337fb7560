//! Model catalog used for load-time validation.
//!
//! The catalog declares which fields exist on each model and which of them
//! are relational. It is only consulted while a bundle is compiled; record
//! data itself always comes from the record provider.

use std::collections::{BTreeMap, HashSet};

use rowguard_domain::{DomainExpr, FieldPath, Leaf, Operator, Value, ValueKind};
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};

/// Implicit identity field present on every model.
pub const ID_FIELD: &str = "id";

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    Char,
    Text,
    Date,
    Datetime,
    Many2one,
    Selection,
}

impl FieldKind {
    /// The runtime value kind stored in fields of this kind.
    pub fn value_kind(self) -> ValueKind {
        match self {
            FieldKind::Boolean => ValueKind::Bool,
            FieldKind::Integer => ValueKind::Int,
            FieldKind::Float => ValueKind::Float,
            FieldKind::Char | FieldKind::Text | FieldKind::Selection => ValueKind::String,
            FieldKind::Date => ValueKind::Date,
            FieldKind::Datetime => ValueKind::DateTime,
            FieldKind::Many2one => ValueKind::Ref,
        }
    }

    pub fn is_relational(self) -> bool {
        self == FieldKind::Many2one
    }

    pub fn is_textual(self) -> bool {
        matches!(self, FieldKind::Char | FieldKind::Text | FieldKind::Selection)
    }
}

/// A field definition within a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Declared kind.
    pub kind: FieldKind,
    /// Target model of a many-to-one field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl FieldDef {
    /// Create a scalar field.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            relation: None,
        }
    }

    /// Create a many-to-one field pointing at `target`.
    pub fn many2one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Many2one,
            relation: Some(target.into()),
        }
    }
}

/// A model and its declared fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDef {
    /// Model name.
    pub name: String,
    /// Declared fields, excluding the implicit `id`.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a declared field.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` is declared or is the implicit id.
    pub fn has_field(&self, name: &str) -> bool {
        name == ID_FIELD || self.field(name).is_some()
    }

    /// Declared field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// The set of models a policy bundle may refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelDef>,
}

impl ModelCatalog {
    /// Build a catalog, rejecting duplicates and dangling relations.
    pub fn from_models(models: impl IntoIterator<Item = ModelDef>) -> PolicyResult<Self> {
        let mut catalog = BTreeMap::new();
        for model in models {
            if model.name.is_empty() {
                return Err(PolicyError::MalformedRule("model with empty name".into()));
            }
            let mut seen: HashSet<&str> = HashSet::new();
            for field in &model.fields {
                let fresh = seen.insert(field.name.as_str());
                if field.name.is_empty() || field.name == ID_FIELD || !fresh {
                    return Err(PolicyError::MalformedRule(format!(
                        "invalid or duplicate field '{}' on model '{}'",
                        field.name, model.name
                    )));
                }
                if field.kind.is_relational() != field.relation.is_some() {
                    return Err(PolicyError::MalformedRule(format!(
                        "field '{}.{}': only many2one fields carry a relation",
                        model.name, field.name
                    )));
                }
            }
            drop(seen);
            let name = model.name.clone();
            if catalog.insert(name.clone(), model).is_some() {
                return Err(PolicyError::MalformedRule(format!(
                    "model '{}' declared twice",
                    name
                )));
            }
        }

        for model in catalog.values() {
            for target in model.fields.iter().filter_map(|f| f.relation.as_deref()) {
                if !catalog.contains_key(target) {
                    return Err(PolicyError::UnknownModel(target.to_string()));
                }
            }
        }

        Ok(Self { models: catalog })
    }

    /// Look up a model.
    pub fn model(&self, name: &str) -> PolicyResult<&ModelDef> {
        self.models
            .get(name)
            .ok_or_else(|| PolicyError::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// All models, ordered by name.
    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Resolve a dotted path starting at `model` and return the final
    /// field's kind. Every hop must be a declared many-to-one field.
    pub fn resolve_path(&self, model: &str, path: &FieldPath) -> PolicyResult<FieldKind> {
        let unknown = || PolicyError::UnknownField {
            model: model.to_string(),
            field: path.to_string(),
        };

        let mut current = self.model(model)?;
        for hop in path.hops() {
            let field = current.field(hop).ok_or_else(unknown)?;
            let target = field.relation.as_deref().ok_or_else(unknown)?;
            current = self.model(target)?;
        }

        if path.last() == ID_FIELD {
            return Ok(FieldKind::Many2one);
        }
        current
            .field(path.last())
            .map(|f| f.kind)
            .ok_or_else(unknown)
    }

    /// Check every leaf of `domain` against the catalog.
    pub fn validate_domain(&self, model: &str, domain: &DomainExpr) -> PolicyResult<()> {
        for leaf in domain.leaves() {
            let kind = self.resolve_path(model, &leaf.path)?;
            self.check_leaf(model, kind, leaf)?;
        }
        Ok(())
    }

    fn check_leaf(&self, model: &str, kind: FieldKind, leaf: &Leaf) -> PolicyResult<()> {
        let mismatch = |literal: &Value| PolicyError::TypeMismatch {
            model: model.to_string(),
            field: leaf.path.to_string(),
            detail: format!(
                "operator '{}' cannot compare {} field with {}",
                leaf.operator,
                kind.value_kind(),
                literal
            ),
        };

        for literal in leaf.operand.values() {
            let ok = match leaf.operator {
                Operator::Like | Operator::Ilike | Operator::NotLike | Operator::NotIlike => {
                    kind.is_textual() && matches!(literal, Value::String(_))
                }
                Operator::ChildOf => {
                    kind.is_relational() && matches!(literal, Value::Int(_) | Value::Ref(_))
                }
                _ => kind.value_kind().accepts(literal),
            };
            if !ok {
                return Err(mismatch(literal));
            }
        }
        Ok(())
    }
}
