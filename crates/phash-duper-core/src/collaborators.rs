//! Interfaces the duplicate engine consumes from the rest of the system.
//!
//! `Database` implements all three over its own tables (see `storage::files`), which is what
//! the CLI and the tests run against.

use crate::storage::models::{DomainId, FileId};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};

/// Maps content hashes to integer file ids.
pub trait HashStore {
    fn get_or_create_id(&self, content_hash: u64) -> rusqlite::Result<FileId>;
    fn resolve(&self, file_id: FileId) -> rusqlite::Result<Option<u64>>;
}

/// Which locations a file must currently be in to count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DomainFilter {
    #[default]
    All,
    /// Union of the listed domains.
    Domains(Vec<DomainId>),
}

impl DomainFilter {
    /// Union of two filters. `All` absorbs everything.
    pub fn union(&self, other: &DomainFilter) -> DomainFilter {
        match (self, other) {
            (DomainFilter::All, _) | (_, DomainFilter::All) => DomainFilter::All,
            (DomainFilter::Domains(a), DomainFilter::Domains(b)) => {
                let mut ids = a.clone();
                for id in b {
                    if !ids.contains(id) {
                        ids.push(*id);
                    }
                }
                ids.sort();
                DomainFilter::Domains(ids)
            }
        }
    }
}

pub trait FileDomain {
    /// The subset of `file_ids` currently present in `filter`.
    fn resolve_eligible_files(
        &self,
        filter: &DomainFilter,
        file_ids: &[FileId],
    ) -> rusqlite::Result<AHashSet<FileId>>;
}

/// A tag conjunction. An empty predicate set matches every file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Predicates {
    #[serde(default)]
    pub required_tags: Vec<String>,
    #[serde(default)]
    pub excluded_tags: Vec<String>,
}

impl Predicates {
    pub fn is_empty(&self) -> bool {
        self.required_tags.is_empty() && self.excluded_tags.is_empty()
    }
}

pub trait SearchEngine {
    /// Files matching `predicates`, restricted to `candidates` when given.
    fn execute(
        &self,
        predicates: &Predicates,
        candidates: Option<&AHashSet<FileId>>,
    ) -> rusqlite::Result<AHashSet<FileId>>;
}
