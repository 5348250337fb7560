//! Rowguard Core - policy evaluation engine.
//!
//! This crate combines model-level access rights, row-level record rules and
//! field-level grants into one fail-closed decision surface:
//! - [`AccessRightsStore`]: additive CRUD grants per (group, model)
//! - [`RecordRuleStore`]: domain-expression filters, global or group scoped
//! - [`FieldGrantStore`]: per-field read/write group restrictions
//! - [`PolicyEngine`]: publishes immutable snapshots and answers checks
//!
//! # Example
//!
//! ```rust
//! use rowguard_core::{
//!     AccessRule, FieldDef, FieldKind, ModelDef, Operation, PolicyBundle, PolicyEngine,
//!     Principal, RecordRuleDef,
//! };
//! use rowguard_domain::{MemoryRecord, MemoryRecords, RecordId};
//!
//! let bundle = PolicyBundle::new()
//!     .with_model(ModelDef::new("doc").with_field(FieldDef::new("owner", FieldKind::Integer)))
//!     .with_access_rule(AccessRule::new("doc_read", "doc").allow(Operation::Read))
//!     .with_record_rule(RecordRuleDef::new("own", "doc", "[('owner', '=', 42)]"));
//! let engine = PolicyEngine::with_bundle(&bundle).unwrap();
//!
//! let records = MemoryRecords::new()
//!     .with(MemoryRecord::new(1).with_field("owner", 42))
//!     .with(MemoryRecord::new(2).with_field("owner", 7));
//! let alice = Principal::new("alice");
//!
//! assert!(engine.check_operation(&alice, "doc", Operation::Read).is_allowed());
//! let visible = engine
//!     .filter_records(&alice, "doc", Operation::Read, &[RecordId(1), RecordId(2)], &records)
//!     .unwrap();
//! assert_eq!(visible, vec![RecordId(1)]);
//! ```

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod archive;
pub mod bundle;
pub mod cache;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod operation;
pub mod principal;
pub mod snapshot;
pub mod store;

pub use archive::BundleArchive;
pub use bundle::PolicyBundle;
pub use cache::{CacheStats, DomainCache};
pub use catalog::{FieldDef, FieldKind, ModelCatalog, ModelDef};
pub use engine::{Decision, DenyReason, EngineConfig, PolicyEngine, Row};
pub use error::{PolicyError, PolicyResult};
pub use operation::Operation;
pub use principal::{GroupId, GroupResolver, Principal, StaticGroups};
pub use snapshot::PolicySnapshot;
pub use store::{
    AccessRightsStore, AccessRule, FieldGrant, FieldGrantStore, RecordRule, RecordRuleDef,
    RecordRuleStore,
};

/// Re-export the domain expression crate.
pub use rowguard_domain as domain;
