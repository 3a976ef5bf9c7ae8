use crate::storage::models::*;
use crate::storage::Database;
use rusqlite::{params, OptionalExtension, Params, Result};

impl Database {
    // ── Potential Pairs ──────────────────────────────────────────

    /// Record candidate pairs for `media_id`. Candidates that are the media itself, confirmed
    /// alternates of it, or in a false-positive group are skipped. An existing pair keeps its
    /// first-seen distance. Returns the number of new rows.
    pub fn add_potential_pairs(&self, media_id: MediaId, candidates: &[(MediaId, u32)]) -> Result<usize> {
        self.in_transaction(|| {
            let group = self.alternates_group_for_media(media_id)?;
            let mut inserted = 0;
            for &(other, distance) in candidates {
                if other == media_id || self.are_confirmed_alternates(media_id, other)? {
                    continue;
                }
                if let (Some(group), Some(other_group)) =
                    (group, self.alternates_group_for_media(other)?)
                {
                    if self.groups_are_false_positive(group, other_group)? {
                        continue;
                    }
                }
                let pair = PotentialPair::new(media_id, other, distance);
                inserted += self
                    .connection()
                    .prepare_cached(
                        "INSERT OR IGNORE INTO potential_pairs \
                         (smaller_media_id, larger_media_id, distance) VALUES (?1, ?2, ?3)",
                    )?
                    .execute(params![pair.smaller, pair.larger, pair.distance])?;
            }
            Ok(inserted)
        })
    }

    pub fn potential_pair(&self, a: MediaId, b: MediaId) -> Result<Option<PotentialPair>> {
        let (smaller, larger) = canonical_pair(a, b);
        self.connection()
            .prepare_cached(
                "SELECT distance FROM potential_pairs \
                 WHERE smaller_media_id = ?1 AND larger_media_id = ?2",
            )?
            .query_row(params![smaller, larger], |row| row.get(0))
            .optional()
            .map(|distance| {
                distance.map(|distance| PotentialPair {
                    smaller,
                    larger,
                    distance,
                })
            })
    }

    pub fn potential_pairs_for_media(&self, media_id: MediaId) -> Result<Vec<PotentialPair>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT smaller_media_id, larger_media_id, distance FROM potential_pairs \
             WHERE smaller_media_id = ?1 OR larger_media_id = ?1 \
             ORDER BY smaller_media_id, larger_media_id",
        )?;
        let rows = stmt
            .query_map(params![media_id], |row| {
                Ok(PotentialPair {
                    smaller: row.get(0)?,
                    larger: row.get(1)?,
                    distance: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn potential_pair_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM potential_pairs", [], |row| row.get(0))
    }

    /// One page of pairs in key order, strictly after `after`.
    pub fn potential_pairs_after(
        &self,
        after: (MediaId, MediaId),
        max_distance: u32,
        limit: usize,
    ) -> Result<Vec<PotentialPair>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT smaller_media_id, larger_media_id, distance FROM potential_pairs \
             WHERE (smaller_media_id, larger_media_id) > (?1, ?2) AND distance <= ?3 \
             ORDER BY smaller_media_id, larger_media_id LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(params![after.0, after.1, max_distance, limit as i64], |row| {
                Ok(PotentialPair {
                    smaller: row.get(0)?,
                    larger: row.get(1)?,
                    distance: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Delete potential pairs matching `predicate` together with any auto-resolution status
    /// rows for them. Both tables name their sides `smaller_media_id` and `larger_media_id`.
    fn delete_pair_rows<P: Params + Clone>(&self, predicate: &str, params: P) -> Result<usize> {
        self.connection().execute(
            &format!("DELETE FROM auto_resolution_pair WHERE {predicate}"),
            params.clone(),
        )?;
        self.connection()
            .execute(&format!("DELETE FROM potential_pairs WHERE {predicate}"), params)
    }

    pub fn delete_potential_pair(&self, a: MediaId, b: MediaId) -> Result<usize> {
        let (smaller, larger) = canonical_pair(a, b);
        self.delete_pair_rows(
            "smaller_media_id = ?1 AND larger_media_id = ?2",
            params![smaller, larger],
        )
    }

    pub fn delete_potential_pairs_for_media(&self, media_id: MediaId) -> Result<usize> {
        self.delete_pair_rows(
            "smaller_media_id = ?1 OR larger_media_id = ?1",
            params![media_id],
        )
    }

    /// Clear every pair with one side in each group.
    pub(crate) fn delete_potential_pairs_between_groups(
        &self,
        a: AlternatesGroupId,
        b: AlternatesGroupId,
    ) -> Result<usize> {
        self.delete_pair_rows(
            "(smaller_media_id IN (SELECT media_id FROM alternates_member WHERE group_id = ?1) \
               AND larger_media_id IN (SELECT media_id FROM alternates_member WHERE group_id = ?2)) \
             OR (smaller_media_id IN (SELECT media_id FROM alternates_member WHERE group_id = ?2) \
               AND larger_media_id IN (SELECT media_id FROM alternates_member WHERE group_id = ?1))",
            params![a, b],
        )
    }
}
