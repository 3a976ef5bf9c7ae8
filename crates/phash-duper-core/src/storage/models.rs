use crate::phash::PerceptualHash;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer surrogate keys. Each wraps the SQLite rowid of its owning table.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

id_type!(
    /// Surrogate for a file's content hash, owned by the hash store.
    FileId
);
id_type!(PerceptualHashId);
id_type!(
    /// A duplicate group: one king plus every file that is the same picture.
    MediaId
);
id_type!(AlternatesGroupId);
id_type!(RuleId);
id_type!(DomainId);

/// One row of the VP-tree joined with the hash it is keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpNode {
    pub hash_id: PerceptualHashId,
    pub phash: PerceptualHash,
    pub parent_id: Option<PerceptualHashId>,
    /// `None` for leaves.
    pub radius: Option<u32>,
    pub inner_id: Option<PerceptualHashId>,
    pub inner_population: i64,
    pub outer_id: Option<PerceptualHashId>,
    pub outer_population: i64,
}

impl VpNode {
    pub fn leaf(
        hash_id: PerceptualHashId,
        phash: PerceptualHash,
        parent_id: Option<PerceptualHashId>,
    ) -> Self {
        VpNode {
            hash_id,
            phash,
            parent_id,
            radius: None,
            inner_id: None,
            inner_population: 0,
            outer_id: None,
            outer_population: 0,
        }
    }

    pub fn population(&self) -> i64 {
        self.inner_population + self.outer_population
    }

    /// Which child slot of this node points at `child`, if any.
    pub fn side_of(&self, child: PerceptualHashId) -> Option<TreeSide> {
        if self.inner_id == Some(child) {
            Some(TreeSide::Inner)
        } else if self.outer_id == Some(child) {
            Some(TreeSide::Outer)
        } else {
            None
        }
    }

    pub fn set_child(&mut self, side: TreeSide, child: Option<PerceptualHashId>, population: i64) {
        match side {
            TreeSide::Inner => {
                self.inner_id = child;
                self.inner_population = population;
            }
            TreeSide::Outer => {
                self.outer_id = child;
                self.outer_population = population;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSide {
    Inner,
    Outer,
}

/// An unresolved candidate relationship between two media, stored with `smaller < larger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PotentialPair {
    pub smaller: MediaId,
    pub larger: MediaId,
    pub distance: u32,
}

impl PotentialPair {
    pub fn new(a: MediaId, b: MediaId, distance: u32) -> Self {
        let (smaller, larger) = canonical_pair(a, b);
        PotentialPair {
            smaller,
            larger,
            distance,
        }
    }

    pub fn key(&self) -> (MediaId, MediaId) {
        (self.smaller, self.larger)
    }

    pub fn involves(&self, media: MediaId) -> bool {
        self.smaller == media || self.larger == media
    }

    /// The other side of the pair, if `media` is one of its sides.
    pub fn partner_of(&self, media: MediaId) -> Option<MediaId> {
        if self.smaller == media {
            Some(self.larger)
        } else if self.larger == media {
            Some(self.smaller)
        } else {
            None
        }
    }
}

/// Order two ids so unordered pairs have one stored form.
pub fn canonical_pair<T: Ord>(a: T, b: T) -> (T, T) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Where an auto-resolution rule stands with one potential pair. Pairs the rule has never
/// looked at have no row at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairStatus {
    DoesNotMatchSearch = 1,
    MatchesSearchButNotTested = 2,
    MatchesSearchFailedTest = 3,
}

impl ToSql for PairStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for PairStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match i64::column_result(value)? {
            1 => Ok(PairStatus::DoesNotMatchSearch),
            2 => Ok(PairStatus::MatchesSearchButNotTested),
            3 => Ok(PairStatus::MatchesSearchFailedTest),
            other => Err(FromSqlError::OutOfRange(other)),
        }
    }
}

/// A file's last known location on disk.
#[derive(Debug, Clone)]
pub struct FileLocation {
    pub file_id: FileId,
    pub path: String,
    pub file_size: i64,
    pub last_seen_at: String,
}

/// A registered auto-resolution rule as persisted.
#[derive(Debug, Clone)]
pub struct RuleRecord {
    pub id: RuleId,
    pub name: String,
    pub search_context: String,
    pub actioned_pairs: i64,
    pub created_at: String,
}

/// Per-status tallies for one rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleCounts {
    pub not_searched: i64,
    pub does_not_match: i64,
    pub matches_not_tested: i64,
    pub failed_test: i64,
    pub actioned: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub files: i64,
    pub perceptual_hashes: i64,
    pub tree_nodes: i64,
    pub queued_rebalances: i64,
    pub files_awaiting_search: i64,
    pub media: i64,
    pub alternates_groups: i64,
    pub potential_pairs: i64,
}
