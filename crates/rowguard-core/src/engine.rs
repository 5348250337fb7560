//! The policy engine.
//!
//! The engine combines the three rule stores of the active snapshot into
//! one fail-closed decision surface:
//!
//! 1. access rights gate the operation at model level,
//! 2. record rules filter the records the operation may touch,
//! 3. field grants shape which fields are read or may be written.
//!
//! Every decision is a pure function of the snapshot loaded at the start of
//! the call, the principal and the record data supplied by the provider.
//! Reloads publish a new snapshot with a single pointer swap; in-flight
//! calls keep the snapshot they started with.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rowguard_domain::{DomainExpr, ProviderError, RecordId, RecordProvider, Value};
use tracing::{debug, info};

use crate::archive::BundleArchive;
use crate::bundle::PolicyBundle;
use crate::cache::{CacheStats, DomainCache};
use crate::error::{PolicyError, PolicyResult};
use crate::operation::Operation;
use crate::principal::{GroupResolver, Principal};
use crate::snapshot::PolicySnapshot;

/// Field values of one record, by field name.
pub type Row = BTreeMap<String, Value>;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of parsed domains kept in the cache.
    pub cache_capacity: usize,
    /// Where published bundles are archived. `None` keeps policy in memory only.
    pub archive_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            archive_path: None,
        }
    }
}

impl EngineConfig {
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_archive_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive_path = Some(path.into());
        self
    }
}

/// Why an operation was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No access rule grants the operation on the model.
    NoAccess { model: String, operation: Operation },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoAccess { model, operation } => {
                write!(f, "no access rule grants {} on '{}'", operation, model)
            }
        }
    }
}

/// Outcome of a model-level check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Convert a denial into the matching error.
    pub fn into_result(self) -> PolicyResult<()> {
        match self {
            Decision::Allowed => Ok(()),
            Decision::Denied(DenyReason::NoAccess { model, operation }) => {
                Err(PolicyError::NoAccess { model, operation })
            }
        }
    }
}

/// Policy engine holding the active snapshot.
pub struct PolicyEngine {
    snapshot: ArcSwap<PolicySnapshot>,
    cache: DomainCache,
    archive: Option<BundleArchive>,
    /// Serializes reloads; readers never take it.
    reload_lock: Mutex<()>,
}

impl PolicyEngine {
    /// Create an engine. When an archive path is configured, the latest
    /// archived bundle becomes the active policy.
    pub fn new(config: EngineConfig) -> PolicyResult<Self> {
        match &config.archive_path {
            Some(path) => Self::from_archive(BundleArchive::open_path(path)?, config),
            None => Ok(Self::empty(config)),
        }
    }

    /// Create an in-memory engine with `bundle` as generation 1.
    pub fn with_bundle(bundle: &PolicyBundle) -> PolicyResult<Self> {
        let engine = Self::empty(EngineConfig::default());
        engine.reload(bundle)?;
        Ok(engine)
    }

    /// Create an engine that restores and archives policy through `archive`.
    pub fn from_archive(archive: BundleArchive, config: EngineConfig) -> PolicyResult<Self> {
        let latest = archive.latest()?;
        let engine = Self::empty(config);

        if let Some((generation, bundle)) = latest {
            let snapshot = bundle.compile(generation, &engine.cache)?;
            engine.publish(snapshot);
        }

        Ok(Self {
            archive: Some(archive),
            ..engine
        })
    }

    fn empty(config: EngineConfig) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(PolicySnapshot::empty()),
            cache: DomainCache::new(config.cache_capacity),
            archive: None,
            reload_lock: Mutex::new(()),
        }
    }

    /// The active snapshot.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.snapshot.load_full()
    }

    /// Generation of the active snapshot.
    pub fn generation(&self) -> u64 {
        self.snapshot.load().generation()
    }

    /// Compile `bundle` and publish it as the next generation.
    ///
    /// The bundle is validated in full before anything is published; on
    /// error the active snapshot is unchanged.
    pub fn reload(&self, bundle: &PolicyBundle) -> PolicyResult<u64> {
        let _guard = self.reload_lock.lock();

        let mut generation = self.generation() + 1;
        if let Some(archive) = &self.archive {
            generation = generation.max(archive.current_generation()? + 1);
        }

        let snapshot = bundle.compile(generation, &self.cache)?;
        if let Some(archive) = &self.archive {
            archive.store(generation, bundle)?;
        }
        self.publish(snapshot);
        self.cache.invalidate_before(generation);
        Ok(generation)
    }

    fn publish(&self, snapshot: PolicySnapshot) {
        info!(
            generation = snapshot.generation(),
            models = snapshot.catalog().len(),
            access_rules = snapshot.access().len(),
            record_rules = snapshot.record_rules().len(),
            field_grants = snapshot.field_grants().len(),
            "published policy snapshot"
        );
        self.snapshot.store(Arc::new(snapshot));
    }

    /// Parse a domain through the shared cache.
    pub fn parse_domain(&self, source: &str) -> PolicyResult<Arc<DomainExpr>> {
        self.cache
            .get_or_parse(source, self.generation())
            .map_err(|source| PolicyError::MalformedDomain {
                rule: "<ad hoc>".to_string(),
                source,
            })
    }

    /// Domain cache statistics.
    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// The archive, when one is configured.
    pub fn archive(&self) -> Option<&BundleArchive> {
        self.archive.as_ref()
    }

    /// Build a principal through the identity provider.
    pub fn principal_for(id: &str, resolver: &dyn GroupResolver) -> PolicyResult<Principal> {
        Ok(Principal {
            id: id.to_string(),
            groups: resolver.resolve_groups(id)?,
        })
    }

    /// Model-level check. The only check possible before records are known.
    pub fn check_operation(&self, principal: &Principal, model: &str, operation: Operation) -> Decision {
        Self::check_in(&self.snapshot.load(), principal, model, operation)
    }

    fn check_in(
        snapshot: &PolicySnapshot,
        principal: &Principal,
        model: &str,
        operation: Operation,
    ) -> Decision {
        if snapshot.access().effective_permission(principal, model, operation) {
            return Decision::Allowed;
        }
        debug!(principal = %principal.id, model, %operation, "operation denied");
        Decision::Denied(DenyReason::NoAccess {
            model: model.to_string(),
            operation,
        })
    }

    /// Keep the records the principal may act on, in input order.
    ///
    /// Callers must have received [`Decision::Allowed`] from
    /// [`check_operation`](Self::check_operation) first; the model-level
    /// grant is not re-checked here.
    pub fn filter_records(
        &self,
        principal: &Principal,
        model: &str,
        operation: Operation,
        records: &[RecordId],
        provider: &dyn RecordProvider,
    ) -> PolicyResult<Vec<RecordId>> {
        self.snapshot
            .load()
            .record_rules()
            .filter_allowed(principal, model, operation, records, provider)
    }

    /// Restrict a record's fields to those both requested and readable.
    pub fn project_fields<'a, I>(
        &self,
        principal: &Principal,
        model: &str,
        record: &Row,
        requested: I,
    ) -> Row
    where
        I: IntoIterator<Item = &'a str>,
    {
        let snapshot = self.snapshot.load();
        let grants = snapshot.field_grants();
        requested
            .into_iter()
            .filter(|field| grants.can_read(principal, model, field))
            .filter_map(|field| record.get(field).map(|v| (field.to_string(), v.clone())))
            .collect()
    }

    /// Gate a write of `field_values` to `record`.
    ///
    /// Field grants are checked first, then the model-level grant, then the
    /// record rules for `write`. The first failure is returned.
    pub fn guard_write(
        &self,
        principal: &Principal,
        model: &str,
        record: RecordId,
        field_values: &Row,
        provider: &dyn RecordProvider,
    ) -> PolicyResult<()> {
        let snapshot = self.snapshot.load_full();
        snapshot
            .field_grants()
            .assert_writable(principal, model, field_values.keys().map(String::as_str))?;
        Self::check_in(&snapshot, principal, model, Operation::Write).into_result()?;
        Self::require_row(&snapshot, principal, model, Operation::Write, record, provider)
    }

    /// Gate the creation of `record` carrying `field_values`.
    ///
    /// The provider must already expose the candidate record so the
    /// `create` record rules can be evaluated against it.
    pub fn guard_create(
        &self,
        principal: &Principal,
        model: &str,
        record: RecordId,
        field_values: &Row,
        provider: &dyn RecordProvider,
    ) -> PolicyResult<()> {
        let snapshot = self.snapshot.load_full();
        snapshot
            .field_grants()
            .assert_writable(principal, model, field_values.keys().map(String::as_str))?;
        Self::check_in(&snapshot, principal, model, Operation::Create).into_result()?;
        Self::require_row(&snapshot, principal, model, Operation::Create, record, provider)
    }

    /// Gate the deletion of `record`.
    pub fn guard_unlink(
        &self,
        principal: &Principal,
        model: &str,
        record: RecordId,
        provider: &dyn RecordProvider,
    ) -> PolicyResult<()> {
        let snapshot = self.snapshot.load_full();
        Self::check_in(&snapshot, principal, model, Operation::Unlink).into_result()?;
        Self::require_row(&snapshot, principal, model, Operation::Unlink, record, provider)
    }

    /// The full read path: model check, record filtering and field
    /// projection, against one snapshot.
    pub fn enforce_read(
        &self,
        principal: &Principal,
        model: &str,
        records: &[RecordId],
        requested: &[&str],
        provider: &dyn RecordProvider,
    ) -> PolicyResult<Vec<(RecordId, Row)>> {
        let snapshot = self.snapshot.load_full();
        Self::check_in(&snapshot, principal, model, Operation::Read).into_result()?;

        let allowed = snapshot
            .record_rules()
            .filter_allowed(principal, model, Operation::Read, records, provider)?;
        let visible: Vec<&str> = requested
            .iter()
            .copied()
            .filter(|field| snapshot.field_grants().can_read(principal, model, field))
            .collect();

        let mut rows = Vec::with_capacity(allowed.len());
        for id in allowed {
            let mut row = Row::new();
            for field in &visible {
                let value = provider.get_field(id, field).map_err(|e| match e {
                    ProviderError::UnknownField { field, .. } => PolicyError::UnknownField {
                        model: model.to_string(),
                        field,
                    },
                    other => PolicyError::Provider(other),
                })?;
                row.insert(field.to_string(), value);
            }
            rows.push((id, row));
        }
        Ok(rows)
    }

    fn require_row(
        snapshot: &PolicySnapshot,
        principal: &Principal,
        model: &str,
        operation: Operation,
        record: RecordId,
        provider: &dyn RecordProvider,
    ) -> PolicyResult<()> {
        if snapshot
            .record_rules()
            .allows(principal, model, operation, record, provider)?
        {
            return Ok(());
        }
        debug!(principal = %principal.id, model, %operation, %record, "record denied");
        Err(PolicyError::RowDenied {
            model: model.to_string(),
            record,
            operation,
        })
    }
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("generation", &self.generation())
            .field("cached_domains", &self.cache.len())
            .field("archived", &self.archive.is_some())
            .finish()
    }
}
