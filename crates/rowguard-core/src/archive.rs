//! Persistent archive of published policy bundles.
//!
//! Each published bundle is stored as JSON in a sled tree keyed by its
//! big-endian generation, so iteration order is publication order.

use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::debug;

use crate::bundle::PolicyBundle;
use crate::error::{PolicyError, PolicyResult};

/// Tree name for archived bundles.
const BUNDLE_TREE: &str = "policy:bundles";

/// Tree name for archive metadata.
const META_TREE: &str = "policy:meta";

/// Key for the current generation in the meta tree.
const CURRENT_GENERATION_KEY: &[u8] = b"current_generation";

/// Generation-indexed store of policy bundles.
pub struct BundleArchive {
    db: Db,
    bundle_tree: Tree,
    meta_tree: Tree,
}

impl BundleArchive {
    /// Open or create an archive using the given sled database.
    pub fn open(db: &Db) -> PolicyResult<Self> {
        Ok(Self {
            db: db.clone(),
            bundle_tree: db.open_tree(BUNDLE_TREE)?,
            meta_tree: db.open_tree(META_TREE)?,
        })
    }

    /// Open or create an archive at `path`.
    pub fn open_path(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let db = sled::open(path)?;
        Self::open(&db)
    }

    /// Open an archive backed by a temporary database.
    pub fn temporary() -> PolicyResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::open(&db)
    }

    /// The last stored generation, or 0 when the archive is empty.
    pub fn current_generation(&self) -> PolicyResult<u64> {
        match self.meta_tree.get(CURRENT_GENERATION_KEY)? {
            Some(bytes) => decode_generation(&bytes).ok_or_else(|| {
                PolicyError::CorruptArchive(format!(
                    "current generation holds {} byte(s), expected 8",
                    bytes.len()
                ))
            }),
            None => Ok(0),
        }
    }

    /// Store a bundle under `generation` and make it current.
    ///
    /// The bundle and the current-generation marker are written in one
    /// transaction.
    pub fn store(&self, generation: u64, bundle: &PolicyBundle) -> PolicyResult<()> {
        let value = serde_json::to_vec(bundle)?;
        let key = generation.to_be_bytes();

        let result: Result<(), TransactionError<PolicyError>> =
            (&self.bundle_tree, &self.meta_tree).transaction(|(bundles, meta)| {
                bundles.insert(&key[..], value.as_slice())?;
                meta.insert(CURRENT_GENERATION_KEY, &key[..])?;
                Ok::<(), ConflictableTransactionError<PolicyError>>(())
            });

        match result {
            Ok(()) => {
                debug!(generation, "archived policy bundle");
                Ok(())
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(PolicyError::Storage(e)),
        }
    }

    /// The bundle stored under `generation`.
    pub fn at(&self, generation: u64) -> PolicyResult<Option<PolicyBundle>> {
        match self.bundle_tree.get(generation.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The current generation and its bundle.
    pub fn latest(&self) -> PolicyResult<Option<(u64, PolicyBundle)>> {
        let generation = self.current_generation()?;
        if generation == 0 {
            return Ok(None);
        }
        Ok(self.at(generation)?.map(|bundle| (generation, bundle)))
    }

    /// All stored generations, ascending.
    pub fn list_generations(&self) -> PolicyResult<Vec<u64>> {
        let mut generations = Vec::new();
        for result in self.bundle_tree.iter() {
            let (key, _) = result?;
            if let Some(generation) = decode_generation(&key) {
                generations.push(generation);
            }
        }
        Ok(generations)
    }

    /// Keep only the newest `keep` generations. Returns how many were removed.
    pub fn prune(&self, keep: usize) -> PolicyResult<usize> {
        let generations = self.list_generations()?;
        let excess = generations.len().saturating_sub(keep);
        for generation in &generations[..excess] {
            self.bundle_tree.remove(generation.to_be_bytes())?;
        }
        if excess > 0 {
            debug!(removed = excess, keep, "pruned archived policy bundles");
        }
        Ok(excess)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> PolicyResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_generation(bytes: &[u8]) -> Option<u64> {
    let buf: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(buf))
}
