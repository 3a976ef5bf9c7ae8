use std::collections::HashMap;

use phash_duper_core::budget::{WorkBudget, WorkOutcome};
use phash_duper_core::collaborators::HashStore;
use phash_duper_core::storage::models::*;
use phash_duper_core::storage::Database;
use phash_duper_core::{IndexSettings, PerceptualHash, SilentReporter, SimilarityIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn open_index(db: &Database) -> SimilarityIndex<'_> {
    SimilarityIndex::open(db, IndexSettings::default())
        .unwrap()
        .with_rng(StdRng::seed_from_u64(7))
}

fn add_file(db: &Database, index: &mut SimilarityIndex<'_>, content: u64, phash: u64) -> FileId {
    let file_id = db.get_or_create_id(content).unwrap();
    index.associate(file_id, &[PerceptualHash(phash)]).unwrap();
    file_id
}

fn descendants(nodes: &HashMap<PerceptualHashId, VpNode>, start: Option<PerceptualHashId>) -> Vec<PerceptualHashId> {
    let mut out = Vec::new();
    let mut stack: Vec<PerceptualHashId> = start.into_iter().collect();
    while let Some(id) = stack.pop() {
        out.push(id);
        let node = &nodes[&id];
        stack.extend(node.inner_id);
        stack.extend(node.outer_id);
    }
    out
}

/// Inner descendants within the radius, outer descendants beyond it, and parent pointers that
/// agree with child pointers.
fn assert_vp_invariant(db: &Database) {
    let nodes: HashMap<PerceptualHashId, VpNode> = db
        .vp_tree_nodes()
        .unwrap()
        .into_iter()
        .map(|n| (n.hash_id, n))
        .collect();
    let roots: Vec<_> = nodes.values().filter(|n| n.parent_id.is_none()).collect();
    assert!(roots.len() <= 1, "more than one root: {:?}", roots);

    for node in nodes.values() {
        for child in node.inner_id.iter().chain(node.outer_id.iter()) {
            assert_eq!(nodes[child].parent_id, Some(node.hash_id));
        }
        if let Some(parent) = node.parent_id {
            assert!(nodes[&parent].side_of(node.hash_id).is_some());
        }
        let Some(radius) = node.radius else {
            assert!(node.inner_id.is_none() && node.outer_id.is_none());
            continue;
        };
        for id in descendants(&nodes, node.inner_id) {
            assert!(node.phash.distance(&nodes[&id].phash) <= radius);
        }
        for id in descendants(&nodes, node.outer_id) {
            assert!(node.phash.distance(&nodes[&id].phash) > radius);
        }
    }

    if let Some(root) = roots.first() {
        assert_eq!(descendants(&nodes, Some(root.hash_id)).len(), nodes.len());
    }
}

fn assert_populations_exact(db: &Database) {
    let nodes: HashMap<PerceptualHashId, VpNode> = db
        .vp_tree_nodes()
        .unwrap()
        .into_iter()
        .map(|n| (n.hash_id, n))
        .collect();
    for node in nodes.values() {
        assert_eq!(node.inner_population as usize, descendants(&nodes, node.inner_id).len());
        assert_eq!(node.outer_population as usize, descendants(&nodes, node.outer_id).len());
    }
}

#[test]
fn test_empty_index_search_returns_nothing() {
    let db = Database::open_in_memory().unwrap();
    let index = open_index(&db);
    assert!(index.root().is_none());
    assert!(index.search_hashes(&[PerceptualHash(0)], 10).unwrap().is_empty());
    assert_eq!(index.height().unwrap(), 0);
}

#[test]
fn test_exact_search_is_reflexive() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let f1 = add_file(&db, &mut index, 1, 0xabcd);
    let f2 = add_file(&db, &mut index, 2, 0xabcd);
    let f3 = add_file(&db, &mut index, 3, 0xabce);

    let hits = index.search_file(f1, 0).unwrap();
    assert_eq!(hits.get(&f1), Some(&0));
    assert_eq!(hits.get(&f2), Some(&0));
    assert!(!hits.contains_key(&f3));
    // one hash row shared by both files
    assert_eq!(db.perceptual_hash_count().unwrap(), 2);
}

#[test]
fn test_search_respects_distance() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let f1 = add_file(&db, &mut index, 1, 0);
    let f2 = add_file(&db, &mut index, 2, 1);
    let f3 = add_file(&db, &mut index, 3, u64::MAX);

    let hits = index.search_file(f1, 1).unwrap();
    assert_eq!(hits.get(&f2), Some(&1));
    assert!(!hits.contains_key(&f3));

    let hits = index.search_file(f1, 64).unwrap();
    assert_eq!(hits.get(&f3), Some(&64));
}

#[test]
fn test_unbounded_distance_reaches_every_file() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let f1 = add_file(&db, &mut index, 1, 0);
    let f2 = add_file(&db, &mut index, 2, 0xff);
    let f3 = add_file(&db, &mut index, 3, 0xff00);

    let hits = index.search_file(f1, u32::MAX).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits.get(&f2), Some(&8));
    assert_eq!(hits.get(&f3), Some(&8));
}

#[test]
fn test_multiple_hashes_keep_minimum_distance() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let target = add_file(&db, &mut index, 1, 0b1111);
    let query = db.get_or_create_id(2).unwrap();
    index
        .associate(query, &[PerceptualHash(0), PerceptualHash(0b0111)])
        .unwrap();

    let hits = index.search_file(query, 4).unwrap();
    assert_eq!(hits.get(&target), Some(&1));
    assert_eq!(hits.get(&query), Some(&0));
}

#[test]
fn test_associate_resets_search_cache() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let f1 = add_file(&db, &mut index, 1, 42);
    assert_eq!(db.files_needing_search(4, 10).unwrap(), vec![f1]);

    db.set_searched_distance(f1, 4).unwrap();
    assert_eq!(db.searched_distance(f1).unwrap(), Some(4));
    assert!(db.files_needing_search(4, 10).unwrap().is_empty());
    assert_eq!(db.files_needing_search(5, 10).unwrap(), vec![f1]);

    index.associate(f1, &[PerceptualHash(43)]).unwrap();
    assert_eq!(db.searched_distance(f1).unwrap(), None);
}

#[test]
fn test_search_matches_brute_force() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let mut rng = StdRng::seed_from_u64(11);

    // clustered hashes so small radii still find something
    let centers: Vec<u64> = (0..8).map(|_| rng.gen()).collect();
    let mut hashes = Vec::new();
    for i in 0..400u64 {
        let center = centers[(i % 8) as usize];
        let mut h = center;
        for _ in 0..rng.gen_range(0..6) {
            h ^= 1u64 << rng.gen_range(0..64u32);
        }
        hashes.push(h);
        add_file(&db, &mut index, i + 1, h);
    }
    assert_vp_invariant(&db);

    for query in hashes.iter().take(40) {
        let q = PerceptualHash(*query);
        for max in [1, 3, 6, 10] {
            let found = index.search_hashes(&[q], max).unwrap();
            let mut expected: Vec<u64> = hashes
                .iter()
                .copied()
                .filter(|h| q.distance(&PerceptualHash(*h)) <= max)
                .collect();
            expected.sort();
            expected.dedup();
            assert_eq!(found.len(), expected.len(), "query {:x} at {}", query, max);
            for (hash_id, distance) in found {
                let phash = db.perceptual_hash(hash_id).unwrap().unwrap();
                assert_eq!(q.distance(&phash), distance);
            }
        }
    }
}

#[test]
fn test_inserts_keep_invariant_and_exact_populations() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let mut rng = StdRng::seed_from_u64(3);
    for i in 0..300u64 {
        add_file(&db, &mut index, i + 1, rng.gen());
    }
    assert_vp_invariant(&db);
    assert_populations_exact(&db);
    assert_eq!(db.vp_tree_node_count().unwrap(), 300);
}

#[test]
fn test_skewed_insert_queues_topmost_ancestor() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    add_file(&db, &mut index, 1, 0);
    let root = index.root().unwrap();

    // every single-bit hash is at distance 1 from the root, so all land inside
    for bit in 0..17u64 {
        add_file(&db, &mut index, bit + 2, 1 << bit);
    }
    assert_eq!(db.queued_rebalances().unwrap(), vec![root]);
    let height_before = index.height().unwrap();

    let report = index
        .maintain(&WorkBudget::unlimited(), &SilentReporter)
        .unwrap();
    assert_eq!(report.outcome, WorkOutcome::Finished);
    assert_eq!(report.branches_rebuilt, 1);
    assert_eq!(report.nodes_rebuilt, 18);
    assert!(db.queued_rebalances().unwrap().is_empty());
    assert!(index.height().unwrap() < height_before);
    assert_vp_invariant(&db);
    assert_populations_exact(&db);
}

#[test]
fn test_maintain_keeps_invariant_and_search_results() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let mut rng = StdRng::seed_from_u64(99);
    let mut hashes = Vec::new();
    let base: u64 = rng.gen();
    for i in 0..500u64 {
        // a narrow cluster produces lopsided inserts
        let h = base ^ (rng.gen::<u64>() & 0xffff);
        hashes.push(h);
        add_file(&db, &mut index, i + 1, h);
    }
    assert!(!db.queued_rebalances().unwrap().is_empty());

    index
        .maintain(&WorkBudget::unlimited(), &SilentReporter)
        .unwrap();
    assert!(db.queued_rebalances().unwrap().is_empty());
    assert_vp_invariant(&db);
    assert_eq!(db.vp_tree_root_ids().unwrap(), vec![index.root().unwrap()]);

    let q = PerceptualHash(hashes[17]);
    let found = index.search_hashes(&[q], 5).unwrap();
    let mut expected: Vec<u64> = hashes
        .iter()
        .copied()
        .filter(|h| q.distance(&PerceptualHash(*h)) <= 5)
        .collect();
    expected.sort();
    expected.dedup();
    assert_eq!(found.len(), expected.len());

    // a reopened index finds the same root
    let reopened = SimilarityIndex::open(&db, IndexSettings::default()).unwrap();
    assert_eq!(reopened.root(), index.root());
}

#[test]
fn test_maintain_stops_on_expired_budget() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    add_file(&db, &mut index, 1, 0);
    for bit in 0..17u64 {
        add_file(&db, &mut index, bit + 2, 1 << bit);
    }
    let budget = WorkBudget {
        deadline: Some(std::time::Instant::now()),
        cancel: None,
    };
    let report = index.maintain(&budget, &SilentReporter).unwrap();
    assert_eq!(report.outcome, WorkOutcome::Interrupted);
    assert_eq!(report.branches_rebuilt, 0);
    assert_eq!(db.queued_rebalances().unwrap().len(), 1);
}

#[test]
fn test_disassociated_hash_is_removed_on_regeneration() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let f1 = add_file(&db, &mut index, 1, 0);
    let f2 = add_file(&db, &mut index, 2, 0xff);
    let f3 = add_file(&db, &mut index, 3, 0xff00);

    index.disassociate(f2, &[PerceptualHash(0xff)]).unwrap();
    let orphan = db.perceptual_hash_id(PerceptualHash(0xff)).unwrap().unwrap();
    // still in the tree until its branch is rebuilt
    assert!(db.vp_node(orphan).unwrap().is_some());
    assert!(db.is_queued_for_rebalance(orphan).unwrap());
    assert_eq!(db.searched_distance(f2).unwrap(), None);
    assert!(!db.files_needing_search(8, 10).unwrap().contains(&f2));

    let report = index
        .maintain(&WorkBudget::unlimited(), &SilentReporter)
        .unwrap();
    assert_eq!(report.orphans_removed, 1);
    assert!(db.vp_node(orphan).unwrap().is_none());
    assert!(db.perceptual_hash_id(PerceptualHash(0xff)).unwrap().is_none());
    assert_vp_invariant(&db);

    let hits = index.search_file(f1, 64).unwrap();
    assert!(hits.contains_key(&f3));
    assert!(!hits.contains_key(&f2));
}

#[test]
fn test_regenerating_whole_tree_of_orphans_empties_it() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let f1 = add_file(&db, &mut index, 1, 5);
    index.disassociate(f1, &[PerceptualHash(5)]).unwrap();

    let root = index.root().unwrap();
    let rebuilt = index.regenerate_branch(root).unwrap();
    assert_eq!(rebuilt.orphans_removed, 1);
    assert!(index.root().is_none());
    assert_eq!(db.vp_tree_node_count().unwrap(), 0);

    // the next insert starts a fresh tree
    add_file(&db, &mut index, 2, 9);
    assert!(index.root().is_some());
    assert_vp_invariant(&db);
}

#[test]
fn test_regenerate_inner_branch_reattaches_to_parent() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let mut rng = StdRng::seed_from_u64(5);
    for i in 0..60u64 {
        add_file(&db, &mut index, i + 1, rng.gen());
    }
    let root = db.vp_node(index.root().unwrap()).unwrap().unwrap();
    let branch = root.inner_id.unwrap();
    let branch_size = root.inner_population;

    let rebuilt = index.regenerate_branch(branch).unwrap();
    assert_eq!(rebuilt.nodes as i64, branch_size);

    let root_after = db.vp_node(root.hash_id).unwrap().unwrap();
    assert!(root_after.inner_id.is_some());
    assert_eq!(root_after.inner_population, branch_size);
    assert_eq!(db.vp_tree_node_count().unwrap(), 60);
    assert_vp_invariant(&db);
}

#[test]
fn test_orphan_removal_updates_every_ancestor_population() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let mut rng = StdRng::seed_from_u64(11);
    for i in 0..60u64 {
        add_file(&db, &mut index, i + 1, rng.gen());
    }
    index.regenerate_branch(index.root().unwrap()).unwrap();
    assert_populations_exact(&db);

    let nodes: HashMap<PerceptualHashId, VpNode> = db
        .vp_tree_nodes()
        .unwrap()
        .into_iter()
        .map(|n| (n.hash_id, n))
        .collect();
    let child = &nodes[&nodes[&index.root().unwrap()].inner_id.unwrap()];
    let grandchild = child.inner_id.or(child.outer_id).unwrap();
    let doomed = descendants(&nodes, Some(grandchild));
    for hash_id in &doomed {
        for file_id in db.files_for_perceptual_hash(*hash_id).unwrap() {
            index.disassociate(file_id, &[nodes[hash_id].phash]).unwrap();
        }
    }

    let rebuilt = index.regenerate_branch(grandchild).unwrap();
    assert_eq!(rebuilt.orphans_removed, doomed.len());
    assert_eq!(db.vp_tree_node_count().unwrap() as usize, 60 - doomed.len());
    assert_populations_exact(&db);
    assert_vp_invariant(&db);
}

#[test]
fn test_maintain_with_scattered_orphans_keeps_populations_exact() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    let mut rng = StdRng::seed_from_u64(23);
    let mut files = Vec::new();
    for i in 0..80u64 {
        let h: u64 = rng.gen();
        files.push((add_file(&db, &mut index, i + 1, h), h));
    }
    index
        .maintain(&WorkBudget::unlimited(), &SilentReporter)
        .unwrap();

    for (file_id, h) in files.iter().step_by(3) {
        index.disassociate(*file_id, &[PerceptualHash(*h)]).unwrap();
    }
    let report = index
        .maintain(&WorkBudget::unlimited(), &SilentReporter)
        .unwrap();
    assert_eq!(report.orphans_removed, files.iter().step_by(3).count());
    assert!(db.queued_rebalances().unwrap().is_empty());
    assert_populations_exact(&db);
    assert_vp_invariant(&db);
}

#[test]
fn test_stale_queue_entry_is_discarded() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    add_file(&db, &mut index, 1, 1);
    db.connection()
        .execute("INSERT INTO rebalance_queue (hash_id) VALUES (999)", [])
        .unwrap();

    let report = index
        .maintain(&WorkBudget::unlimited(), &SilentReporter)
        .unwrap();
    assert_eq!(report.outcome, WorkOutcome::Finished);
    assert!(db.queued_rebalances().unwrap().is_empty());
    assert_eq!(db.vp_tree_node_count().unwrap(), 1);
}

#[test]
fn test_failed_associate_does_not_leave_a_phantom_root() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    db.connection()
        .execute_batch(
            "CREATE TEMP TRIGGER refuse_links BEFORE INSERT ON perceptual_hash_map \
             BEGIN SELECT RAISE(ABORT, 'link refused'); END;",
        )
        .unwrap();

    let file_id = db.get_or_create_id(1).unwrap();
    assert!(index.associate(file_id, &[PerceptualHash(5)]).is_err());
    assert!(index.root().is_none());
    assert_eq!(db.vp_tree_node_count().unwrap(), 0);

    db.connection()
        .execute_batch("DROP TRIGGER refuse_links;")
        .unwrap();
    add_file(&db, &mut index, 2, 9);
    assert_eq!(db.vp_tree_root_ids().unwrap(), vec![index.root().unwrap()]);
    assert_vp_invariant(&db);
}

#[test]
fn test_two_roots_is_an_integrity_fault() {
    let db = Database::open_in_memory().unwrap();
    db.connection()
        .execute_batch(
            "INSERT INTO perceptual_hash (hash_id, phash) VALUES (1, 1), (2, 2);
             INSERT INTO vptree (hash_id) VALUES (1), (2);",
        )
        .unwrap();
    let err = SimilarityIndex::open(&db, IndexSettings::default()).err().unwrap();
    assert!(err.is_fatal());
}

#[test]
fn test_dangling_child_pointer_is_an_integrity_fault() {
    let db = Database::open_in_memory().unwrap();
    let mut index = open_index(&db);
    add_file(&db, &mut index, 1, 0);
    add_file(&db, &mut index, 2, 3);
    let root = index.root().unwrap();
    db.connection()
        .execute(
            "UPDATE vptree SET inner_id = 777 WHERE hash_id = ?1",
            [root],
        )
        .unwrap();
    let err = index.search_hashes(&[PerceptualHash(0)], 4).unwrap_err();
    assert!(err.is_fatal());
}
