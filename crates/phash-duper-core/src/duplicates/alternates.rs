use crate::storage::models::*;
use crate::storage::Database;
use rusqlite::{params, OptionalExtension, Result};
use tracing::debug;

impl Database {
    // ── Alternates Groups ────────────────────────────────────────

    pub fn alternates_group_for_media(&self, media_id: MediaId) -> Result<Option<AlternatesGroupId>> {
        self.connection()
            .prepare_cached("SELECT group_id FROM alternates_member WHERE media_id = ?1")?
            .query_row(params![media_id], |row| row.get(0))
            .optional()
    }

    pub fn get_or_create_alternates_group(&self, media_id: MediaId) -> Result<AlternatesGroupId> {
        self.in_transaction(|| {
            if let Some(group_id) = self.alternates_group_for_media(media_id)? {
                return Ok(group_id);
            }
            self.connection()
                .execute("INSERT INTO alternates_group DEFAULT VALUES", [])?;
            let group_id = AlternatesGroupId(self.connection().last_insert_rowid());
            self.connection()
                .prepare_cached(
                    "INSERT INTO alternates_member (group_id, media_id) VALUES (?1, ?2)",
                )?
                .execute(params![group_id, media_id])?;
            Ok(group_id)
        })
    }

    pub fn alternates_group_members(&self, group_id: AlternatesGroupId) -> Result<Vec<MediaId>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT media_id FROM alternates_member WHERE group_id = ?1 ORDER BY media_id",
        )?;
        let rows = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn alternates_group_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM alternates_group", [], |row| row.get(0))
    }

    /// Same alternates group. Media without a group are never alternates.
    pub fn are_alternates(&self, a: MediaId, b: MediaId) -> Result<bool> {
        match (
            self.alternates_group_for_media(a)?,
            self.alternates_group_for_media(b)?,
        ) {
            (Some(ga), Some(gb)) => Ok(ga == gb),
            _ => Ok(false),
        }
    }

    /// Detach a media from its alternates group and drop confirmed-alternate rows touching it.
    /// A group left empty is deleted along with its false-positive declarations.
    pub fn remove_alternate_member(&self, media_id: MediaId) -> Result<()> {
        self.in_transaction(|| {
            self.connection().execute(
                "DELETE FROM confirmed_alternates \
                 WHERE smaller_media_id = ?1 OR larger_media_id = ?1",
                params![media_id],
            )?;
            let Some(group_id) = self.alternates_group_for_media(media_id)? else {
                return Ok(());
            };
            self.connection().execute(
                "DELETE FROM alternates_member WHERE media_id = ?1",
                params![media_id],
            )?;
            if self.alternates_group_members(group_id)?.is_empty() {
                self.delete_alternates_group(group_id)?;
            }
            Ok(())
        })
    }

    fn delete_alternates_group(&self, group_id: AlternatesGroupId) -> Result<()> {
        self.connection().execute(
            "DELETE FROM false_positives WHERE smaller_group_id = ?1 OR larger_group_id = ?1",
            params![group_id],
        )?;
        self.connection().execute(
            "DELETE FROM alternates_group WHERE group_id = ?1",
            params![group_id],
        )?;
        debug!("Deleted empty alternates group {}", group_id);
        Ok(())
    }

    // ── Confirmed Alternates ─────────────────────────────────────

    pub fn are_confirmed_alternates(&self, a: MediaId, b: MediaId) -> Result<bool> {
        let (smaller, larger) = canonical_pair(a, b);
        self.connection()
            .prepare_cached(
                "SELECT EXISTS(SELECT 1 FROM confirmed_alternates \
                 WHERE smaller_media_id = ?1 AND larger_media_id = ?2)",
            )?
            .query_row(params![smaller, larger], |row| row.get(0))
    }

    pub fn confirmed_alternate_partners(&self, media_id: MediaId) -> Result<Vec<MediaId>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT larger_media_id FROM confirmed_alternates WHERE smaller_media_id = ?1 \
             UNION SELECT smaller_media_id FROM confirmed_alternates WHERE larger_media_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![media_id], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub(crate) fn insert_confirmed_alternates(&self, a: MediaId, b: MediaId) -> Result<()> {
        let (smaller, larger) = canonical_pair(a, b);
        self.connection()
            .prepare_cached(
                "INSERT OR IGNORE INTO confirmed_alternates (smaller_media_id, larger_media_id) \
                 VALUES (?1, ?2)",
            )?
            .execute(params![smaller, larger])?;
        Ok(())
    }

    pub(crate) fn delete_confirmed_alternates(&self, a: MediaId, b: MediaId) -> Result<()> {
        let (smaller, larger) = canonical_pair(a, b);
        self.connection()
            .prepare_cached(
                "DELETE FROM confirmed_alternates \
                 WHERE smaller_media_id = ?1 AND larger_media_id = ?2",
            )?
            .execute(params![smaller, larger])?;
        Ok(())
    }

    /// Record that two media are alternates and unify their groups.
    ///
    /// Potentials between them are cleared first in every case. Returns false without
    /// recording anything when their groups are declared false positives.
    pub fn set_alternates(&self, a: MediaId, b: MediaId) -> Result<bool> {
        if a == b {
            return Ok(false);
        }
        self.in_transaction(|| {
            self.delete_potential_pair(a, b)?;

            let group_a = self.get_or_create_alternates_group(a)?;
            let group_b = self.get_or_create_alternates_group(b)?;
            if self.groups_are_false_positive(group_a, group_b)? {
                debug!(
                    "Media {} and {} are in false-positive groups, not setting alternates",
                    a, b
                );
                return Ok(false);
            }

            self.insert_confirmed_alternates(a, b)?;
            if group_a == group_b {
                return Ok(true);
            }

            // B's group inherits A's false positives.
            for other in self.false_positive_partners(group_a)? {
                self.delete_potential_pairs_between_groups(group_b, other)?;
            }

            self.connection().execute(
                "UPDATE alternates_member SET group_id = ?1 WHERE group_id = ?2",
                params![group_a, group_b],
            )?;

            for other in self.false_positive_partners(group_b)? {
                self.delete_false_positive(group_b, other)?;
                self.set_false_positive(group_a, other)?;
            }

            self.connection().execute(
                "DELETE FROM alternates_group WHERE group_id = ?1",
                params![group_b],
            )?;
            debug!("Merged alternates group {} into {}", group_b, group_a);
            Ok(true)
        })
    }

    // ── False Positives ──────────────────────────────────────────

    pub fn groups_are_false_positive(
        &self,
        a: AlternatesGroupId,
        b: AlternatesGroupId,
    ) -> Result<bool> {
        let (smaller, larger) = canonical_pair(a, b);
        self.connection()
            .prepare_cached(
                "SELECT EXISTS(SELECT 1 FROM false_positives \
                 WHERE smaller_group_id = ?1 AND larger_group_id = ?2)",
            )?
            .query_row(params![smaller, larger], |row| row.get(0))
    }

    /// Whether the media's alternates groups are declared false positives. Media without a
    /// group have no declarations.
    pub fn are_false_positive(&self, a: MediaId, b: MediaId) -> Result<bool> {
        match (
            self.alternates_group_for_media(a)?,
            self.alternates_group_for_media(b)?,
        ) {
            (Some(ga), Some(gb)) => self.groups_are_false_positive(ga, gb),
            _ => Ok(false),
        }
    }

    pub fn false_positive_partners(&self, group_id: AlternatesGroupId) -> Result<Vec<AlternatesGroupId>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT larger_group_id FROM false_positives WHERE smaller_group_id = ?1 \
             UNION SELECT smaller_group_id FROM false_positives WHERE larger_group_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Declare two alternates groups unrelated and clear every potential pair across them.
    pub fn set_false_positive(&self, a: AlternatesGroupId, b: AlternatesGroupId) -> Result<()> {
        if a == b {
            return Ok(());
        }
        self.in_transaction(|| {
            self.delete_potential_pairs_between_groups(a, b)?;
            let (smaller, larger) = canonical_pair(a, b);
            self.connection()
                .prepare_cached(
                    "INSERT OR IGNORE INTO false_positives (smaller_group_id, larger_group_id) \
                     VALUES (?1, ?2)",
                )?
                .execute(params![smaller, larger])?;
            Ok(())
        })
    }

    /// [`set_false_positive`](Self::set_false_positive) for two media, creating their groups
    /// as needed. Returns false when they are already alternates of each other.
    pub fn set_false_positive_media(&self, a: MediaId, b: MediaId) -> Result<bool> {
        self.in_transaction(|| {
            let group_a = self.get_or_create_alternates_group(a)?;
            let group_b = self.get_or_create_alternates_group(b)?;
            if group_a == group_b {
                return Ok(false);
            }
            self.set_false_positive(group_a, group_b)?;
            Ok(true)
        })
    }

    pub(crate) fn delete_false_positive(&self, a: AlternatesGroupId, b: AlternatesGroupId) -> Result<()> {
        let (smaller, larger) = canonical_pair(a, b);
        self.connection()
            .prepare_cached(
                "DELETE FROM false_positives WHERE smaller_group_id = ?1 AND larger_group_id = ?2",
            )?
            .execute(params![smaller, larger])?;
        Ok(())
    }
}
