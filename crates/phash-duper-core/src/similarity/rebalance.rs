use super::SimilarityIndex;
use crate::budget::{WorkBudget, WorkOutcome};
use crate::error::Error;
use crate::phash::PerceptualHash;
use crate::progress::ProgressReporter;
use crate::storage::models::*;
use ahash::AHashSet;
use rand::seq::index::sample;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

type Member = (PerceptualHashId, PerceptualHash);

/// Quality of a candidate subtree root, measured over a probe sample of distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewpointScore {
    /// `round(10 * smaller / larger)` for the median split; 10 is a perfect 1:1 split.
    pub balance: u32,
    /// Standard deviation of the probe distances.
    pub spread: f64,
}

impl ViewpointScore {
    pub fn beats(&self, other: &ViewpointScore) -> bool {
        self.balance > other.balance
            || (self.balance == other.balance && self.spread > other.spread)
    }
}

/// The median of sorted distances and whether values equal to it go on the inner side.
/// Ties join whichever side is smaller, inner on a draw.
fn median_split_point(sorted: &[u32]) -> (u32, bool) {
    let median = sorted[sorted.len() / 2];
    let below = sorted.iter().filter(|&&d| d < median).count();
    let above = sorted.iter().filter(|&&d| d > median).count();
    (median, below <= above)
}

pub fn score_viewpoint(distances: &[u32]) -> ViewpointScore {
    if distances.is_empty() {
        return ViewpointScore {
            balance: 10,
            spread: 0.0,
        };
    }
    let mut sorted = distances.to_vec();
    sorted.sort_unstable();
    let (median, ties_inner) = median_split_point(&sorted);
    let inner = sorted
        .iter()
        .filter(|&&d| d < median || (d == median && ties_inner))
        .count();
    let outer = sorted.len() - inner;

    let smaller = inner.min(outer) as f64;
    let larger = inner.max(outer) as f64;
    let balance = if larger == 0.0 {
        0
    } else {
        (smaller / larger * 10.0).round() as u32
    };

    let n = sorted.len() as f64;
    let mean = sorted.iter().map(|&d| d as f64).sum::<f64>() / n;
    let variance = sorted
        .iter()
        .map(|&d| {
            let delta = d as f64 - mean;
            delta * delta
        })
        .sum::<f64>()
        / n;

    ViewpointScore {
        balance,
        spread: variance.sqrt(),
    }
}

struct MedianSplit {
    radius: u32,
    inner: Vec<Member>,
    outer: Vec<Member>,
}

/// Split `members` around `center`. Inner members end up at distance `<= radius`, outer
/// members strictly beyond it.
fn split_at_median(center: &PerceptualHash, members: Vec<Member>) -> MedianSplit {
    let mut sorted: Vec<u32> = members.iter().map(|(_, h)| center.distance(h)).collect();
    sorted.sort_unstable();
    let (median, ties_inner) = median_split_point(&sorted);
    let radius = if ties_inner {
        median
    } else {
        median.saturating_sub(1)
    };

    let mut inner = Vec::new();
    let mut outer = Vec::new();
    for member in members {
        let d = center.distance(&member.1);
        if d < median || (d == median && ties_inner) {
            inner.push(member);
        } else {
            outer.push(member);
        }
    }
    MedianSplit {
        radius,
        inner,
        outer,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchRebuild {
    pub nodes: usize,
    pub orphans_removed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct MaintenanceReport {
    pub branches_rebuilt: usize,
    pub nodes_rebuilt: usize,
    pub orphans_removed: usize,
    pub outcome: WorkOutcome,
}

impl<'db> SimilarityIndex<'db> {
    /// Drain the rebalance queue, topmost branch first, one branch per transaction.
    pub fn maintain(
        &mut self,
        budget: &WorkBudget,
        reporter: &dyn ProgressReporter,
    ) -> Result<MaintenanceReport, Error> {
        let mut report = MaintenanceReport {
            branches_rebuilt: 0,
            nodes_rebuilt: 0,
            orphans_removed: 0,
            outcome: WorkOutcome::Finished,
        };

        loop {
            if budget.should_stop() {
                report.outcome = WorkOutcome::Interrupted;
                break;
            }
            let Some(branch) = self.topmost_queued_branch()? else {
                break;
            };
            let rebuilt = self.regenerate_branch(branch)?;
            report.branches_rebuilt += 1;
            report.nodes_rebuilt += rebuilt.nodes;
            report.orphans_removed += rebuilt.orphans_removed;
            reporter.on_rebalance_progress(report.branches_rebuilt, report.nodes_rebuilt);
        }

        info!(
            "VP-tree maintenance: {} branches, {} nodes rebuilt, {} orphans removed ({:?})",
            report.branches_rebuilt, report.nodes_rebuilt, report.orphans_removed, report.outcome
        );
        Ok(report)
    }

    /// Pick a queued branch that has no queued ancestor.
    fn topmost_queued_branch(&self) -> Result<Option<PerceptualHashId>, Error> {
        let queued = self.db.queued_rebalances()?;
        let Some(&first) = queued.first() else {
            return Ok(None);
        };
        let queued: AHashSet<PerceptualHashId> = queued.into_iter().collect();

        let Some(mut node) = self.db.vp_node(first)? else {
            return Ok(Some(first));
        };
        let mut topmost = first;
        while let Some(parent_id) = node.parent_id {
            if queued.contains(&parent_id) {
                topmost = parent_id;
            }
            node = self.expect_node(parent_id)?;
        }
        Ok(Some(topmost))
    }

    /// Rebuild the subtree rooted at `branch_id` as a median-split tree, dropping hashes no
    /// file references any more.
    pub fn regenerate_branch(&mut self, branch_id: PerceptualHashId) -> Result<BranchRebuild, Error> {
        self.in_tree_transaction(|index| index.regenerate_branch_inner(branch_id))
    }

    fn regenerate_branch_inner(&mut self, branch_id: PerceptualHashId) -> Result<BranchRebuild, Error> {
        let Some(branch_root) = self.db.vp_node(branch_id)? else {
            warn!("Rebalance entry {} has no VP-tree node, discarding", branch_id);
            self.db.dequeue_rebalance(branch_id)?;
            return Ok(BranchRebuild::default());
        };

        let mut collected = Vec::new();
        let mut work = VecDeque::from([branch_id]);
        while let Some(hash_id) = work.pop_front() {
            collected.push(hash_id);
            work.extend(self.db.vp_children(hash_id)?);
        }

        let mut survivors: Vec<Member> = Vec::with_capacity(collected.len());
        let mut orphans_removed = 0;
        for &hash_id in &collected {
            self.db.dequeue_rebalance(hash_id)?;
            if self.db.is_orphan_hash(hash_id)? {
                self.db.delete_perceptual_hash(hash_id)?;
                orphans_removed += 1;
                continue;
            }
            let phash = self.db.perceptual_hash(hash_id)?.ok_or_else(|| {
                Error::integrity(format!("VP-tree node {} has no perceptual hash", hash_id))
            })?;
            self.db.delete_vp_node(hash_id)?;
            survivors.push((hash_id, phash));
        }

        let survivor_count = survivors.len();
        let new_root = self.pop_best_root(&mut survivors);
        let new_root_id = new_root.map(|(id, _)| id);

        match branch_root.parent_id {
            Some(parent_id) => {
                let mut parent = self.expect_node(parent_id)?;
                let side = parent.side_of(branch_id).ok_or_else(|| {
                    Error::integrity(format!(
                        "VP-tree node {} is not a child of its parent {}",
                        branch_id, parent_id
                    ))
                })?;
                parent.set_child(side, new_root_id, survivor_count as i64);
                if parent.inner_id.is_none() && parent.outer_id.is_none() {
                    parent.radius = None;
                }
                self.db.update_vp_node(&parent)?;
                if orphans_removed > 0 {
                    self.discount_ancestors(parent_id, orphans_removed as i64)?;
                }
            }
            None => self.root = new_root_id,
        }

        if let Some((root_id, root_hash)) = new_root {
            self.build_subtree(root_id, root_hash, branch_root.parent_id, survivors)?;
        }

        debug!(
            "Regenerated VP-tree branch {}: {} nodes kept, {} orphans removed",
            branch_id, survivor_count, orphans_removed
        );
        Ok(BranchRebuild {
            nodes: survivor_count,
            orphans_removed,
        })
    }

    /// Subtract `removed` from the side population of every ancestor above `from`.
    fn discount_ancestors(&self, from: PerceptualHashId, removed: i64) -> Result<(), Error> {
        let mut child_id = from;
        let mut child = self.expect_node(from)?;
        while let Some(parent_id) = child.parent_id {
            let mut parent = self.expect_node(parent_id)?;
            match parent.side_of(child_id) {
                Some(TreeSide::Inner) => {
                    parent.inner_population = (parent.inner_population - removed).max(0)
                }
                Some(TreeSide::Outer) => {
                    parent.outer_population = (parent.outer_population - removed).max(0)
                }
                None => {
                    return Err(Error::integrity(format!(
                        "VP-tree node {} is not a child of its parent {}",
                        child_id, parent_id
                    )))
                }
            }
            self.db.update_vp_node(&parent)?;
            child_id = parent_id;
            child = parent;
        }
        Ok(())
    }

    /// Top-down construction through a work queue rather than recursion, so deep branches do
    /// not grow the stack.
    fn build_subtree(
        &mut self,
        root_id: PerceptualHashId,
        root_hash: PerceptualHash,
        parent_id: Option<PerceptualHashId>,
        members: Vec<Member>,
    ) -> Result<(), Error> {
        let mut queue = VecDeque::from([(root_id, root_hash, parent_id, members)]);
        while let Some((hash_id, phash, parent_id, members)) = queue.pop_front() {
            let mut node = VpNode::leaf(hash_id, phash, parent_id);
            if !members.is_empty() {
                let MedianSplit {
                    radius,
                    mut inner,
                    mut outer,
                } = split_at_median(&phash, members);
                node.radius = Some(radius);

                let inner_population = inner.len() as i64;
                if let Some((child_id, child_hash)) = self.pop_best_root(&mut inner) {
                    node.set_child(TreeSide::Inner, Some(child_id), inner_population);
                    queue.push_back((child_id, child_hash, Some(hash_id), inner));
                }
                let outer_population = outer.len() as i64;
                if let Some((child_id, child_hash)) = self.pop_best_root(&mut outer) {
                    node.set_child(TreeSide::Outer, Some(child_id), outer_population);
                    queue.push_back((child_id, child_hash, Some(hash_id), outer));
                }
            }
            self.db.insert_vp_node(&node)?;
        }
        Ok(())
    }

    /// Remove and return the candidate that splits the rest most evenly, breaking ties by the
    /// widest distance spread. Viewpoints and probes are sampled when the set is large.
    fn pop_best_root(&mut self, candidates: &mut Vec<Member>) -> Option<Member> {
        let len = candidates.len();
        if len <= 1 {
            return candidates.pop();
        }

        let max_candidates = self.settings.max_root_candidates.max(1);
        let max_sample = self.settings.max_root_sample.max(1);

        let viewpoints: Vec<usize> = if len > max_candidates {
            sample(&mut self.rng, len, max_candidates).into_vec()
        } else {
            (0..len).collect()
        };

        let mut best: Option<(usize, ViewpointScore)> = None;
        for viewpoint in viewpoints {
            let probe: Vec<usize> = if len - 1 > max_sample {
                sample(&mut self.rng, len, max_sample + 1)
                    .into_iter()
                    .filter(|&i| i != viewpoint)
                    .take(max_sample)
                    .collect()
            } else {
                (0..len).filter(|&i| i != viewpoint).collect()
            };

            let center = candidates[viewpoint].1;
            let distances: Vec<u32> = probe
                .iter()
                .map(|&i| center.distance(&candidates[i].1))
                .collect();
            let score = score_viewpoint(&distances);
            if best.as_ref().map_or(true, |(_, current)| score.beats(current)) {
                best = Some((viewpoint, score));
            }
        }

        best.map(|(index, _)| candidates.swap_remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(hashes: &[u64]) -> Vec<Member> {
        hashes
            .iter()
            .enumerate()
            .map(|(i, &h)| (PerceptualHashId(i as i64 + 1), PerceptualHash(h)))
            .collect()
    }

    #[test]
    fn test_perfect_split_scores_ten() {
        let score = score_viewpoint(&[1, 2, 3, 4]);
        assert_eq!(score.balance, 10);
        assert!(score.spread > 1.0);
    }

    #[test]
    fn test_identical_distances_score_zero_balance() {
        let score = score_viewpoint(&[5, 5, 5, 5]);
        assert_eq!(score.balance, 0);
        assert_eq!(score.spread, 0.0);
    }

    #[test]
    fn test_balance_outranks_spread() {
        let balanced = ViewpointScore {
            balance: 10,
            spread: 0.5,
        };
        let spread_out = ViewpointScore {
            balance: 7,
            spread: 20.0,
        };
        assert!(balanced.beats(&spread_out));
        assert!(!spread_out.beats(&balanced));
        let wider = ViewpointScore {
            balance: 10,
            spread: 1.0,
        };
        assert!(wider.beats(&balanced));
    }

    #[test]
    fn test_split_respects_radius() {
        let center = PerceptualHash(0);
        // distances 0, 1, 2, 2, 2, 8
        let split = split_at_median(&center, members(&[0, 1, 0b11, 0b101, 0b110, 0xff]));
        for (_, h) in &split.inner {
            assert!(center.distance(h) <= split.radius);
        }
        for (_, h) in &split.outer {
            assert!(center.distance(h) > split.radius);
        }
        assert_eq!(split.inner.len() + split.outer.len(), 6);
    }

    #[test]
    fn test_ties_move_outward_when_inner_is_larger() {
        let center = PerceptualHash(0);
        // distances 1, 1, 1, 2, 2: median 1 has nothing below and two above
        let split = split_at_median(&center, members(&[1, 2, 4, 0b11, 0b101]));
        assert_eq!(split.radius, 1);
        assert_eq!(split.inner.len(), 3);

        // distances 0, 0, 1, 1, 1: median 1 has two below and none above
        let split = split_at_median(&center, members(&[0, 0, 1, 2, 4]));
        assert_eq!(split.radius, 0);
        assert_eq!(split.inner.len(), 2);
        assert_eq!(split.outer.len(), 3);
    }
}
