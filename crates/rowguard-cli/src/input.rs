//! Loading of command-line inputs: bundles, record fixtures and principals.

use std::collections::BTreeMap;
use std::path::Path;

use rowguard_core::{PolicyBundle, PolicyEngine, Principal, Row};
use rowguard_domain::{MemoryRecord, MemoryRecords, RecordId};
use tracing::debug;

use crate::commands::CommandError;
use crate::PrincipalArgs;

/// Record fixtures keyed by model name.
///
/// ```json
/// { "doc": [{"id": 1, "fields": {"owner": 42}}] }
/// ```
pub type RecordsFile = BTreeMap<String, Vec<MemoryRecord>>;

/// Records loaded from a fixture file.
pub struct Fixtures {
    pub records: MemoryRecords,
    by_model: BTreeMap<String, Vec<RecordId>>,
}

impl Fixtures {
    /// Ids of every record listed under `model`, in file order.
    pub fn ids_of(&self, model: &str) -> Vec<RecordId> {
        self.by_model.get(model).cloned().unwrap_or_default()
    }
}

/// Compile a bundle file into a fresh in-memory engine.
pub fn load_engine(path: &Path) -> Result<PolicyEngine, CommandError> {
    let bundle = PolicyBundle::from_path(path)?;
    Ok(PolicyEngine::with_bundle(&bundle)?)
}

/// Read a record fixture file.
pub fn load_records(path: &Path) -> Result<Fixtures, CommandError> {
    let text = std::fs::read_to_string(path)?;
    let file: RecordsFile = serde_json::from_str(&text)?;
    Ok(fixtures_from(file))
}

fn fixtures_from(file: RecordsFile) -> Fixtures {
    let mut records = MemoryRecords::new();
    let mut by_model = BTreeMap::new();
    for (model, rows) in file {
        let ids: Vec<RecordId> = rows.iter().map(|r| r.id).collect();
        debug!(model = %model, count = ids.len(), "loaded records");
        for row in rows {
            records.insert(row);
        }
        by_model.insert(model, ids);
    }
    Fixtures { records, by_model }
}

/// Build the principal named on the command line.
pub fn principal(args: &PrincipalArgs) -> Principal {
    Principal::new(args.principal.as_str())
        .with_groups(args.groups.iter().map(String::as_str).filter(|g| !g.is_empty()))
}

/// Parse field values given as a JSON object.
pub fn parse_values(json: &str) -> Result<Row, CommandError> {
    Ok(serde_json::from_str(json)?)
}
