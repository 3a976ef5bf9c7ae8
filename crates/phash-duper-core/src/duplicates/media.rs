use crate::collaborators::{DomainFilter, FileDomain};
use crate::error::Error;
use crate::storage::models::*;
use crate::storage::Database;
use ahash::AHashSet;
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::{params, OptionalExtension, Result};
use tracing::debug;

impl Database {
    // ── Media ────────────────────────────────────────────────────

    /// The media a file belongs to, without creating one.
    pub fn media_for_file(&self, file_id: FileId) -> Result<Option<MediaId>> {
        self.connection()
            .prepare_cached("SELECT media_id FROM media_member WHERE file_id = ?1")?
            .query_row(params![file_id], |row| row.get(0))
            .optional()
    }

    /// Look up the file's media, creating a singleton with the file as king if it has none.
    /// Callers are serialized on the one connection, so two lookups cannot both create.
    pub fn get_or_create_media(&self, file_id: FileId) -> Result<MediaId> {
        self.in_transaction(|| {
            if let Some(media_id) = self.media_for_file(file_id)? {
                return Ok(media_id);
            }
            self.connection()
                .prepare_cached("INSERT INTO media (king_file_id) VALUES (?1)")?
                .execute(params![file_id])?;
            let media_id = MediaId(self.connection().last_insert_rowid());
            self.connection()
                .prepare_cached("INSERT INTO media_member (media_id, file_id) VALUES (?1, ?2)")?
                .execute(params![media_id, file_id])?;
            debug!("Created media {} for file {}", media_id, file_id);
            Ok(media_id)
        })
    }

    pub fn media_exists(&self, media_id: MediaId) -> Result<bool> {
        self.connection()
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM media WHERE media_id = ?1)")?
            .query_row(params![media_id], |row| row.get(0))
    }

    pub fn media_king(&self, media_id: MediaId) -> Result<Option<FileId>> {
        self.connection()
            .prepare_cached("SELECT king_file_id FROM media WHERE media_id = ?1")?
            .query_row(params![media_id], |row| row.get(0))
            .optional()
    }

    pub fn media_members(&self, media_id: MediaId) -> Result<Vec<FileId>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT file_id FROM media_member WHERE media_id = ?1 ORDER BY file_id",
        )?;
        let rows = stmt
            .query_map(params![media_id], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn media_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))
    }

    /// Make `file_id` the king of `media_id`. Returns false when the file is not a member.
    pub fn set_king(&self, media_id: MediaId, file_id: FileId) -> Result<bool> {
        if self.media_for_file(file_id)? != Some(media_id) {
            return Ok(false);
        }
        self.connection().execute(
            "UPDATE media SET king_file_id = ?2 WHERE media_id = ?1",
            params![media_id, file_id],
        )?;
        Ok(true)
    }

    /// The king if it is eligible, otherwise a random eligible member, drawn from the
    /// preferred files first when any of them qualify. `None` when no member qualifies.
    ///
    /// The random fallback is deliberate: repeated calls spread which file stands in for the
    /// group.
    pub fn get_best_king<R: Rng + ?Sized>(
        &self,
        media_id: MediaId,
        domain: &DomainFilter,
        allowed: Option<&AHashSet<FileId>>,
        preferred: Option<&AHashSet<FileId>>,
        rng: &mut R,
    ) -> std::result::Result<Option<FileId>, Error> {
        let king = self
            .media_king(media_id)?
            .ok_or_else(|| Error::integrity(format!("media {} does not exist", media_id)))?;
        let members = self.media_members(media_id)?;
        if members.is_empty() {
            return Err(Error::integrity(format!("media {} has no members", media_id)));
        }

        let mut eligible = self.resolve_eligible_files(domain, &members)?;
        if let Some(allowed) = allowed {
            eligible.retain(|file_id| allowed.contains(file_id));
        }
        if eligible.contains(&king) {
            return Ok(Some(king));
        }

        let mut pool: Vec<FileId> = eligible.into_iter().collect();
        pool.sort();
        if let Some(preferred) = preferred {
            let favoured: Vec<FileId> = pool
                .iter()
                .copied()
                .filter(|file_id| preferred.contains(file_id))
                .collect();
            if let Some(choice) = favoured.choose(rng) {
                return Ok(Some(*choice));
            }
        }
        Ok(pool.choose(rng).copied())
    }
}
