use super::SimilarityIndex;
use crate::error::Error;
use crate::phash::PerceptualHash;
use crate::storage::models::FileId;
use crate::storage::Database;
use rusqlite::{params, Result};
use tracing::debug;

impl Database {
    // ── Search Cache ─────────────────────────────────────────────

    /// Forget how far these files have been searched so discovery visits them again.
    pub fn reset_search_cache(&self, file_ids: &[FileId]) -> Result<()> {
        let mut stmt = self.connection().prepare_cached(
            "INSERT INTO search_cache (file_id, searched_distance) VALUES (?1, NULL) \
             ON CONFLICT(file_id) DO UPDATE SET searched_distance = NULL",
        )?;
        for file_id in file_ids {
            stmt.execute(params![file_id])?;
        }
        Ok(())
    }

    pub fn set_searched_distance(&self, file_id: FileId, distance: u32) -> Result<()> {
        self.connection()
            .prepare_cached(
                "INSERT INTO search_cache (file_id, searched_distance) VALUES (?1, ?2) \
                 ON CONFLICT(file_id) DO UPDATE SET searched_distance = excluded.searched_distance",
            )?
            .execute(params![file_id, distance])?;
        Ok(())
    }

    /// `None` when the file has never been searched or was reset since.
    pub fn searched_distance(&self, file_id: FileId) -> Result<Option<u32>> {
        match self.connection().query_row(
            "SELECT searched_distance FROM search_cache WHERE file_id = ?1",
            params![file_id],
            |row| row.get(0),
        ) {
            Ok(distance) => Ok(distance),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn files_needing_search(&self, distance: u32, limit: usize) -> Result<Vec<FileId>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT file_id FROM search_cache \
             WHERE searched_distance IS NULL OR searched_distance < ?1 \
             ORDER BY file_id LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![distance, limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_files_needing_search(&self, distance: u32) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM search_cache \
             WHERE searched_distance IS NULL OR searched_distance < ?1",
            params![distance],
            |row| row.get(0),
        )
    }

    fn drop_search_cache(&self, file_id: FileId) -> Result<()> {
        self.connection()
            .execute("DELETE FROM search_cache WHERE file_id = ?1", params![file_id])?;
        Ok(())
    }
}

impl<'db> SimilarityIndex<'db> {
    /// Link `hashes` to `file_id`, indexing any hash seen for the first time, and queue the
    /// file for a fresh potential search.
    pub fn associate(&mut self, file_id: FileId, hashes: &[PerceptualHash]) -> Result<(), Error> {
        let db = self.db;
        self.in_tree_transaction(|index| {
            for &phash in hashes {
                let hash_id = match db.perceptual_hash_id(phash)? {
                    Some(hash_id) => hash_id,
                    None => {
                        let hash_id = db.insert_perceptual_hash(phash)?;
                        index.insert(hash_id, phash)?;
                        hash_id
                    }
                };
                db.link_hash_to_file(hash_id, file_id)?;
            }
            db.reset_search_cache(&[file_id])?;
            Ok(())
        })
    }

    /// Unlink `hashes` from `file_id`. Hashes left without any file stay in the tree and are
    /// queued; the next regeneration of their branch deletes them.
    pub fn disassociate(&mut self, file_id: FileId, hashes: &[PerceptualHash]) -> Result<(), Error> {
        let db = self.db;
        db.in_transaction(|| {
            for &phash in hashes {
                let Some(hash_id) = db.perceptual_hash_id(phash)? else {
                    continue;
                };
                if db.unlink_hash_from_file(hash_id, file_id)? && db.is_orphan_hash(hash_id)? {
                    debug!("Hash {} orphaned by file {}, queueing for removal", hash_id, file_id);
                    db.enqueue_rebalance(hash_id)?;
                }
            }
            if db.file_perceptual_hashes(file_id)?.is_empty() {
                db.drop_search_cache(file_id)?;
            }
            Ok(())
        })
    }
}
