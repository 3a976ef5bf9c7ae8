//! Narrowing the potential-pair table to a search context.

mod blocks;
mod context;
mod plan;

pub use blocks::PairBlocks;
pub use context::{FileSearchContext, PairRelation, PixelDuplicates, PotentialDuplicatesSearchContext};
pub use plan::{PlanNode, SearchConstraint};

use crate::budget::{WorkBudget, WorkOutcome};
use crate::error::Error;
use crate::storage::models::{FileId, MediaId, PotentialPair};
use crate::storage::Database;
use ahash::{AHashMap, AHashSet};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BinaryHeap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSortKey {
    Distance,
    MediaId,
    /// Combined on-disk size of the two kings. Unknown sizes count as zero.
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairSort {
    pub key: PairSortKey,
    pub ascending: bool,
}

impl Default for PairSort {
    fn default() -> Self {
        PairSort {
            key: PairSortKey::Distance,
            ascending: true,
        }
    }
}

impl PairSort {
    /// Smaller keys sort first.
    fn key_of(&self, pair: &PotentialPair, size: i64) -> (i64, i64, i64) {
        let distance = pair.distance as i64;
        let (smaller, larger) = (pair.smaller.0, pair.larger.0);
        match (self.key, self.ascending) {
            (PairSortKey::Size, true) => (size, smaller, larger),
            (PairSortKey::Size, false) => (-size, smaller, larger),
            (PairSortKey::Distance, true) => (distance, smaller, larger),
            (PairSortKey::Distance, false) => (-distance, smaller, larger),
            (PairSortKey::MediaId, true) => (smaller, larger, distance),
            (PairSortKey::MediaId, false) => (-smaller, -larger, distance),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PairCount {
    pub count: usize,
    pub outcome: WorkOutcome,
}

#[derive(Debug, Clone)]
pub struct PairFetch {
    pub pairs: Vec<PotentialPair>,
    pub outcome: WorkOutcome,
}

pub struct PotentialPairFinder<'db> {
    db: &'db Database,
    block_size: usize,
}

impl<'db> PotentialPairFinder<'db> {
    pub fn new(db: &'db Database, block_size: usize) -> Self {
        PotentialPairFinder { db, block_size }
    }

    /// The pairs of `fragment` that satisfy `context`, each reported once.
    pub fn filter_fragment(
        &self,
        context: &PotentialDuplicatesSearchContext,
        fragment: &[PotentialPair],
    ) -> Result<Vec<PotentialPair>, Error> {
        self.run_plan(&PlanNode::compile(context), fragment)
    }

    pub(crate) fn run_plan(
        &self,
        plan: &PlanNode,
        fragment: &[PotentialPair],
    ) -> Result<Vec<PotentialPair>, Error> {
        let mut seen: AHashSet<(MediaId, MediaId)> = AHashSet::new();
        Ok(plan
            .evaluate(self.db, fragment)?
            .into_iter()
            .map(|candidate| candidate.pair)
            .filter(|pair| seen.insert(pair.key()))
            .collect())
    }

    fn blocks(&self, plan: &PlanNode) -> PairBlocks<'db> {
        PairBlocks::new(self.db, plan.max_distance(), self.block_size)
    }

    pub fn count(
        &self,
        context: &PotentialDuplicatesSearchContext,
        budget: &WorkBudget,
    ) -> Result<PairCount, Error> {
        let plan = PlanNode::compile(context);
        let mut count = 0;
        for block in self.blocks(&plan) {
            if budget.should_stop() {
                return Ok(PairCount {
                    count,
                    outcome: WorkOutcome::Interrupted,
                });
            }
            count += self.run_plan(&plan, &block?)?.len();
        }
        Ok(PairCount {
            count,
            outcome: WorkOutcome::Finished,
        })
    }

    /// Matching pairs in `sort` order, keeping only the first `limit` when one is given.
    pub fn fetch(
        &self,
        context: &PotentialDuplicatesSearchContext,
        sort: PairSort,
        limit: Option<usize>,
        budget: &WorkBudget,
    ) -> Result<PairFetch, Error> {
        let plan = PlanNode::compile(context);
        let sizes = match sort.key {
            PairSortKey::Size => Some(self.db.file_sizes()?),
            _ => None,
        };
        let mut heap: BinaryHeap<((i64, i64, i64), PotentialPair)> = BinaryHeap::new();
        let mut outcome = WorkOutcome::Finished;

        for block in self.blocks(&plan) {
            if budget.should_stop() {
                outcome = WorkOutcome::Interrupted;
                break;
            }
            for pair in self.run_plan(&plan, &block?)? {
                let size = match &sizes {
                    Some(sizes) => self.pair_size(sizes, &pair)?,
                    None => 0,
                };
                heap.push((sort.key_of(&pair, size), pair));
                if let Some(limit) = limit {
                    if heap.len() > limit {
                        heap.pop();
                    }
                }
            }
        }

        let pairs: Vec<PotentialPair> = heap
            .into_sorted_vec()
            .into_iter()
            .map(|(_, pair)| pair)
            .collect();
        debug!("Fetched {} potential pairs ({:?})", pairs.len(), outcome);
        Ok(PairFetch { pairs, outcome })
    }

    fn pair_size(&self, sizes: &AHashMap<FileId, i64>, pair: &PotentialPair) -> Result<i64, Error> {
        let mut total = 0;
        for media_id in [pair.smaller, pair.larger] {
            if let Some(king) = self.db.media_king(media_id)? {
                total += sizes.get(&king).copied().unwrap_or(0);
            }
        }
        Ok(total)
    }

    /// Pick one media uniformly among those with a matching pair and return all of its
    /// matching pairs. Empty when nothing matches.
    pub fn random_sample<R: Rng + ?Sized>(
        &self,
        context: &PotentialDuplicatesSearchContext,
        rng: &mut R,
    ) -> Result<Vec<PotentialPair>, Error> {
        let plan = PlanNode::compile(context);
        let mut universe: AHashSet<MediaId> = AHashSet::new();
        for block in self.blocks(&plan) {
            for pair in self.run_plan(&plan, &block?)? {
                universe.insert(pair.smaller);
                universe.insert(pair.larger);
            }
        }

        let mut universe: Vec<MediaId> = universe.into_iter().collect();
        universe.sort();
        let Some(&chosen) = universe.choose(rng) else {
            return Ok(Vec::new());
        };

        let partners = self.db.potential_pairs_for_media(chosen)?;
        self.run_plan(&plan, &partners)
    }
}
