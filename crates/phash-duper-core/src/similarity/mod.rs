//! Vantage-point tree over perceptual hashes, persisted in the `vptree` table.
//!
//! Each node is keyed by the perceptual hash id it holds. Descendants on the inner side lie
//! within `radius` of the node's hash, descendants on the outer side lie strictly beyond it.
//! Inserts keep the tree valid but not balanced; skewed subtrees are queued and rebuilt by
//! [`SimilarityIndex::maintain`].

mod association;
mod rebalance;
mod search;
mod tree;

pub use rebalance::{score_viewpoint, BranchRebuild, MaintenanceReport, ViewpointScore};

use crate::config::AppConfig;
use crate::error::Error;
use crate::storage::models::PerceptualHashId;
use crate::storage::Database;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct IndexSettings {
    /// Combined population a node must exceed before skew is considered.
    pub rebalance_threshold: i64,
    /// Viewpoints considered when choosing a subtree root.
    pub max_root_candidates: usize,
    /// Probe sample per viewpoint.
    pub max_root_sample: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        IndexSettings {
            rebalance_threshold: 16,
            max_root_candidates: 256,
            max_root_sample: 64,
        }
    }
}

impl From<&AppConfig> for IndexSettings {
    fn from(config: &AppConfig) -> Self {
        IndexSettings {
            rebalance_threshold: config.rebalance_threshold,
            max_root_candidates: config.max_root_candidates,
            max_root_sample: config.max_root_sample,
        }
    }
}

pub struct SimilarityIndex<'db> {
    db: &'db Database,
    settings: IndexSettings,
    root: Option<PerceptualHashId>,
    rng: StdRng,
}

impl<'db> SimilarityIndex<'db> {
    /// Load the index, locating the current root. More than one parentless node means the
    /// stored tree is corrupt.
    pub fn open(db: &'db Database, settings: IndexSettings) -> Result<Self, Error> {
        let mut index = SimilarityIndex {
            db,
            settings,
            root: None,
            rng: StdRng::from_entropy(),
        };
        index.reload_root()?;
        Ok(index)
    }

    /// Re-read the root from storage, e.g. after an enclosing transaction rolled back.
    pub fn reload_root(&mut self) -> Result<(), Error> {
        let roots = self.db.vp_tree_root_ids()?;
        if roots.len() > 1 {
            return Err(Error::integrity(format!(
                "VP-tree has {} parentless nodes: {:?}",
                roots.len(),
                roots
            )));
        }
        self.root = roots.first().copied();
        Ok(())
    }

    /// Run a tree mutation in a transaction. If it fails and the rollback has happened, the
    /// root is re-read so it never points at a node that was not committed.
    pub(crate) fn in_tree_transaction<T, F>(&mut self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Self) -> Result<T, Error>,
    {
        let db = self.db;
        let result = db.in_transaction(|| f(self));
        if result.is_err() && db.connection().is_autocommit() {
            if let Err(err) = self.reload_root() {
                warn!("Could not re-read the VP-tree root after a failed update: {}", err);
            }
        }
        result
    }

    /// Replace the random source used for root sampling, e.g. with a seeded one in tests.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn root(&self) -> Option<PerceptualHashId> {
        self.root
    }

    pub fn database(&self) -> &'db Database {
        self.db
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }
}
