use super::SimilarityIndex;
use crate::error::Error;
use crate::phash::PerceptualHash;
use crate::storage::models::*;
use crate::storage::Database;
use rusqlite::{params, OptionalExtension, Result, Row};
use tracing::debug;

const NODE_COLUMNS: &str = "v.hash_id, p.phash, v.parent_id, v.radius, v.inner_id, \
     v.inner_population, v.outer_id, v.outer_population";

fn node_from_row(row: &Row<'_>) -> Result<VpNode> {
    Ok(VpNode {
        hash_id: row.get(0)?,
        phash: row.get(1)?,
        parent_id: row.get(2)?,
        radius: row.get(3)?,
        inner_id: row.get(4)?,
        inner_population: row.get(5)?,
        outer_id: row.get(6)?,
        outer_population: row.get(7)?,
    })
}

impl Database {
    // ── VP-Tree Nodes ────────────────────────────────────────────

    pub fn vp_node(&self, hash_id: PerceptualHashId) -> Result<Option<VpNode>> {
        self.connection()
            .prepare_cached(&format!(
                "SELECT {NODE_COLUMNS} FROM vptree v \
                 JOIN perceptual_hash p ON p.hash_id = v.hash_id \
                 WHERE v.hash_id = ?1"
            ))?
            .query_row(params![hash_id], node_from_row)
            .optional()
    }

    /// Every node in the tree. Intended for diagnostics and tests.
    pub fn vp_tree_nodes(&self) -> Result<Vec<VpNode>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM vptree v \
             JOIN perceptual_hash p ON p.hash_id = v.hash_id \
             ORDER BY v.hash_id"
        ))?;
        let nodes = stmt
            .query_map([], node_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(nodes)
    }

    pub fn vp_tree_root_ids(&self) -> Result<Vec<PerceptualHashId>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT hash_id FROM vptree WHERE parent_id IS NULL")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn vp_tree_node_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM vptree", [], |row| row.get(0))
    }

    pub(crate) fn vp_children(&self, hash_id: PerceptualHashId) -> Result<Vec<PerceptualHashId>> {
        let mut stmt = self
            .connection()
            .prepare_cached("SELECT hash_id FROM vptree WHERE parent_id = ?1")?;
        let ids = stmt
            .query_map(params![hash_id], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub(crate) fn insert_vp_node(&self, node: &VpNode) -> Result<()> {
        self.connection()
            .prepare_cached(
                "INSERT INTO vptree (hash_id, parent_id, radius, inner_id, inner_population, \
                 outer_id, outer_population) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?
            .execute(params![
                node.hash_id,
                node.parent_id,
                node.radius,
                node.inner_id,
                node.inner_population,
                node.outer_id,
                node.outer_population,
            ])?;
        Ok(())
    }

    pub(crate) fn update_vp_node(&self, node: &VpNode) -> Result<()> {
        self.connection()
            .prepare_cached(
                "UPDATE vptree SET parent_id = ?2, radius = ?3, inner_id = ?4, \
                 inner_population = ?5, outer_id = ?6, outer_population = ?7 \
                 WHERE hash_id = ?1",
            )?
            .execute(params![
                node.hash_id,
                node.parent_id,
                node.radius,
                node.inner_id,
                node.inner_population,
                node.outer_id,
                node.outer_population,
            ])?;
        Ok(())
    }

    pub(crate) fn delete_vp_node(&self, hash_id: PerceptualHashId) -> Result<()> {
        self.connection()
            .prepare_cached("DELETE FROM vptree WHERE hash_id = ?1")?
            .execute(params![hash_id])?;
        Ok(())
    }

    // ── Perceptual Hashes ────────────────────────────────────────

    pub fn perceptual_hash_id(&self, phash: PerceptualHash) -> Result<Option<PerceptualHashId>> {
        self.connection()
            .prepare_cached("SELECT hash_id FROM perceptual_hash WHERE phash = ?1")?
            .query_row(params![phash], |row| row.get(0))
            .optional()
    }

    pub fn perceptual_hash(&self, hash_id: PerceptualHashId) -> Result<Option<PerceptualHash>> {
        self.connection()
            .prepare_cached("SELECT phash FROM perceptual_hash WHERE hash_id = ?1")?
            .query_row(params![hash_id], |row| row.get(0))
            .optional()
    }

    pub fn perceptual_hash_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM perceptual_hash", [], |row| row.get(0))
    }

    pub(crate) fn insert_perceptual_hash(&self, phash: PerceptualHash) -> Result<PerceptualHashId> {
        self.connection()
            .prepare_cached("INSERT INTO perceptual_hash (phash) VALUES (?1)")?
            .execute(params![phash])?;
        Ok(PerceptualHashId(self.connection().last_insert_rowid()))
    }

    /// Remove a hash and its tree row. Callers must have detached the node first.
    pub(crate) fn delete_perceptual_hash(&self, hash_id: PerceptualHashId) -> Result<()> {
        self.delete_vp_node(hash_id)?;
        self.connection()
            .prepare_cached("DELETE FROM perceptual_hash WHERE hash_id = ?1")?
            .execute(params![hash_id])?;
        Ok(())
    }

    pub fn file_perceptual_hashes(
        &self,
        file_id: FileId,
    ) -> Result<Vec<(PerceptualHashId, PerceptualHash)>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT p.hash_id, p.phash FROM perceptual_hash_map m \
             JOIN perceptual_hash p ON p.hash_id = m.hash_id \
             WHERE m.file_id = ?1 ORDER BY p.hash_id",
        )?;
        let rows = stmt
            .query_map(params![file_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn files_for_perceptual_hash(&self, hash_id: PerceptualHashId) -> Result<Vec<FileId>> {
        let mut stmt = self
            .connection()
            .prepare_cached("SELECT file_id FROM perceptual_hash_map WHERE hash_id = ?1")?;
        let rows = stmt
            .query_map(params![hash_id], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub(crate) fn link_hash_to_file(&self, hash_id: PerceptualHashId, file_id: FileId) -> Result<()> {
        self.connection()
            .prepare_cached(
                "INSERT OR IGNORE INTO perceptual_hash_map (hash_id, file_id) VALUES (?1, ?2)",
            )?
            .execute(params![hash_id, file_id])?;
        Ok(())
    }

    pub(crate) fn unlink_hash_from_file(
        &self,
        hash_id: PerceptualHashId,
        file_id: FileId,
    ) -> Result<bool> {
        let removed = self
            .connection()
            .prepare_cached("DELETE FROM perceptual_hash_map WHERE hash_id = ?1 AND file_id = ?2")?
            .execute(params![hash_id, file_id])?;
        Ok(removed > 0)
    }

    pub(crate) fn is_orphan_hash(&self, hash_id: PerceptualHashId) -> Result<bool> {
        let linked: bool = self
            .connection()
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM perceptual_hash_map WHERE hash_id = ?1)")?
            .query_row(params![hash_id], |row| row.get(0))?;
        Ok(!linked)
    }

    // ── Rebalance Queue ──────────────────────────────────────────

    pub(crate) fn enqueue_rebalance(&self, hash_id: PerceptualHashId) -> Result<()> {
        self.connection()
            .prepare_cached("INSERT OR IGNORE INTO rebalance_queue (hash_id) VALUES (?1)")?
            .execute(params![hash_id])?;
        Ok(())
    }

    pub(crate) fn dequeue_rebalance(&self, hash_id: PerceptualHashId) -> Result<()> {
        self.connection()
            .prepare_cached("DELETE FROM rebalance_queue WHERE hash_id = ?1")?
            .execute(params![hash_id])?;
        Ok(())
    }

    pub fn queued_rebalances(&self) -> Result<Vec<PerceptualHashId>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT hash_id FROM rebalance_queue ORDER BY hash_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn is_queued_for_rebalance(&self, hash_id: PerceptualHashId) -> Result<bool> {
        self.connection()
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM rebalance_queue WHERE hash_id = ?1)")?
            .query_row(params![hash_id], |row| row.get(0))
    }
}

impl<'db> SimilarityIndex<'db> {
    /// Fetch a node that some pointer claims exists. A miss is a dangling pointer.
    pub(crate) fn expect_node(&self, hash_id: PerceptualHashId) -> Result<VpNode, Error> {
        self.db.vp_node(hash_id)?.ok_or_else(|| {
            Error::integrity(format!("VP-tree references missing node {}", hash_id))
        })
    }

    /// Place a new hash in the tree. The hash row must already exist and have no node yet.
    pub fn insert(&mut self, hash_id: PerceptualHashId, phash: PerceptualHash) -> Result<(), Error> {
        let Some(root) = self.root else {
            self.db.insert_vp_node(&VpNode::leaf(hash_id, phash, None))?;
            self.root = Some(hash_id);
            debug!("Hash {} became the VP-tree root", hash_id);
            return Ok(());
        };

        let mut path: Vec<VpNode> = Vec::new();
        let mut current = root;
        let parent = loop {
            let mut node = self.expect_node(current)?;
            let distance = node.phash.distance(&phash);
            let side = match node.radius {
                None => TreeSide::Inner,
                Some(radius) if distance <= radius => TreeSide::Inner,
                Some(_) => TreeSide::Outer,
            };

            let child = match side {
                TreeSide::Inner => {
                    node.inner_population += 1;
                    node.inner_id
                }
                TreeSide::Outer => {
                    node.outer_population += 1;
                    node.outer_id
                }
            };

            match child {
                Some(child) => {
                    self.db.update_vp_node(&node)?;
                    path.push(node);
                    current = child;
                }
                None => {
                    match side {
                        TreeSide::Inner => node.inner_id = Some(hash_id),
                        TreeSide::Outer => node.outer_id = Some(hash_id),
                    }
                    if node.radius.is_none() {
                        node.radius = Some(distance);
                    }
                    self.db.update_vp_node(&node)?;
                    let parent = node.hash_id;
                    path.push(node);
                    break parent;
                }
            }
        };

        self.db
            .insert_vp_node(&VpNode::leaf(hash_id, phash, Some(parent)))?;

        // Rebuilding the topmost skewed ancestor also rebuilds everything below it.
        if let Some(skewed) = path.iter().find(|node| self.is_unbalanced(node)) {
            debug!(
                "Queueing VP-tree branch {} for rebalance (inner {}, outer {})",
                skewed.hash_id, skewed.inner_population, skewed.outer_population
            );
            self.db.enqueue_rebalance(skewed.hash_id)?;
        }
        Ok(())
    }

    /// Number of levels, walking the whole tree breadth-first.
    pub fn height(&self) -> Result<usize, Error> {
        let Some(root) = self.root else {
            return Ok(0);
        };
        let mut level = vec![root];
        let mut height = 0;
        while !level.is_empty() {
            height += 1;
            let mut next = Vec::new();
            for hash_id in level {
                next.extend(self.db.vp_children(hash_id)?);
            }
            level = next;
        }
        Ok(height)
    }

    fn is_unbalanced(&self, node: &VpNode) -> bool {
        if node.population() <= self.settings.rebalance_threshold {
            return false;
        }
        let smaller = node.inner_population.min(node.outer_population) as f64;
        let larger = node.inner_population.max(node.outer_population) as f64;
        smaller / larger < 0.5
    }
}
