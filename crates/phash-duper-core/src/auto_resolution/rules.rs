use crate::error::Error;
use crate::pairs::PotentialDuplicatesSearchContext;
use crate::storage::models::*;
use crate::storage::Database;
use rusqlite::{params, OptionalExtension, Result, Row};
use tracing::info;

fn rule_from_row(row: &Row<'_>) -> Result<RuleRecord> {
    Ok(RuleRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        search_context: row.get(2)?,
        actioned_pairs: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn pair_from_row(row: &Row<'_>) -> Result<PotentialPair> {
    Ok(PotentialPair {
        smaller: row.get(0)?,
        larger: row.get(1)?,
        distance: row.get(2)?,
    })
}

impl Database {
    // ── Rules ────────────────────────────────────────────────────

    /// Register a rule by name, or update an existing one. Changing a rule's search context
    /// forgets every status it has recorded, since they were computed under the old scope.
    pub fn register_rule(
        &self,
        name: &str,
        context: &PotentialDuplicatesSearchContext,
    ) -> std::result::Result<RuleId, Error> {
        let context_json = serde_json::to_string(context)?;
        self.in_transaction(|| {
            if let Some(existing) = self.rule_by_name(name)? {
                if existing.search_context != context_json {
                    self.connection().execute(
                        "UPDATE auto_resolution_rule SET search_context = ?2 WHERE rule_id = ?1",
                        params![existing.id, context_json],
                    )?;
                    self.reset_rule_search(existing.id)?;
                    info!("Search context of rule '{}' changed, statuses reset", name);
                }
                return Ok(existing.id);
            }
            let now = chrono::Utc::now().to_rfc3339();
            self.connection().execute(
                "INSERT INTO auto_resolution_rule (name, search_context, created_at) \
                 VALUES (?1, ?2, ?3)",
                params![name, context_json, now],
            )?;
            Ok(RuleId(self.connection().last_insert_rowid()))
        })
    }

    pub fn rule_by_name(&self, name: &str) -> Result<Option<RuleRecord>> {
        self.connection()
            .query_row(
                "SELECT rule_id, name, search_context, actioned_pairs, created_at \
                 FROM auto_resolution_rule WHERE name = ?1",
                params![name],
                rule_from_row,
            )
            .optional()
    }

    pub fn list_rules(&self) -> Result<Vec<RuleRecord>> {
        let mut stmt = self.connection().prepare(
            "SELECT rule_id, name, search_context, actioned_pairs, created_at \
             FROM auto_resolution_rule ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], rule_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_rule(&self, rule_id: RuleId) -> Result<()> {
        self.connection().execute(
            "DELETE FROM auto_resolution_rule WHERE rule_id = ?1",
            params![rule_id],
        )?;
        Ok(())
    }

    pub(crate) fn increment_rule_actioned(&self, rule_id: RuleId) -> Result<()> {
        self.connection()
            .prepare_cached(
                "UPDATE auto_resolution_rule SET actioned_pairs = actioned_pairs + 1 \
                 WHERE rule_id = ?1",
            )?
            .execute(params![rule_id])?;
        Ok(())
    }

    // ── Rule Pair Statuses ───────────────────────────────────────

    /// Potential pairs this rule has not classified yet.
    pub(crate) fn unsearched_rule_pairs(&self, rule_id: RuleId, limit: usize) -> Result<Vec<PotentialPair>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT p.smaller_media_id, p.larger_media_id, p.distance FROM potential_pairs p \
             LEFT JOIN auto_resolution_pair a ON a.rule_id = ?1 \
               AND a.smaller_media_id = p.smaller_media_id \
               AND a.larger_media_id = p.larger_media_id \
             WHERE a.rule_id IS NULL \
             ORDER BY p.smaller_media_id, p.larger_media_id LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![rule_id, limit as i64], pair_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub(crate) fn set_rule_pair_status(
        &self,
        rule_id: RuleId,
        pair: &PotentialPair,
        status: PairStatus,
    ) -> Result<()> {
        self.connection()
            .prepare_cached(
                "INSERT INTO auto_resolution_pair \
                 (rule_id, smaller_media_id, larger_media_id, distance, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(rule_id, smaller_media_id, larger_media_id) \
                 DO UPDATE SET status = excluded.status",
            )?
            .execute(params![rule_id, pair.smaller, pair.larger, pair.distance, status])?;
        Ok(())
    }

    pub fn rule_pair_status(&self, rule_id: RuleId, a: MediaId, b: MediaId) -> Result<Option<PairStatus>> {
        let (smaller, larger) = canonical_pair(a, b);
        self.connection()
            .query_row(
                "SELECT status FROM auto_resolution_pair \
                 WHERE rule_id = ?1 AND smaller_media_id = ?2 AND larger_media_id = ?3",
                params![rule_id, smaller, larger],
                |row| row.get(0),
            )
            .optional()
    }

    /// The closest pair that matched the rule's search and has not been tested.
    pub(crate) fn next_untested_rule_pair(&self, rule_id: RuleId) -> Result<Option<PotentialPair>> {
        self.connection()
            .prepare_cached(
                "SELECT smaller_media_id, larger_media_id, distance FROM auto_resolution_pair \
                 WHERE rule_id = ?1 AND status = ?2 \
                 ORDER BY distance, smaller_media_id, larger_media_id LIMIT 1",
            )?
            .query_row(
                params![rule_id, PairStatus::MatchesSearchButNotTested],
                pair_from_row,
            )
            .optional()
    }

    pub fn rule_counts(&self, rule_id: RuleId) -> Result<RuleCounts> {
        let mut counts = RuleCounts::default();
        let mut stmt = self.connection().prepare(
            "SELECT status, COUNT(*) FROM auto_resolution_pair WHERE rule_id = ?1 GROUP BY status",
        )?;
        let rows = stmt
            .query_map(params![rule_id], |row| {
                Ok((row.get::<_, PairStatus>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        let mut classified = 0;
        for (status, count) in rows {
            classified += count;
            match status {
                PairStatus::DoesNotMatchSearch => counts.does_not_match = count,
                PairStatus::MatchesSearchButNotTested => counts.matches_not_tested = count,
                PairStatus::MatchesSearchFailedTest => counts.failed_test = count,
            }
        }
        counts.not_searched = self.potential_pair_count()? - classified;
        counts.actioned = self.connection().query_row(
            "SELECT actioned_pairs FROM auto_resolution_rule WHERE rule_id = ?1",
            params![rule_id],
            |row| row.get(0),
        )?;
        Ok(counts)
    }

    /// Forget every status so the rule searches the whole table again.
    pub fn reset_rule_search(&self, rule_id: RuleId) -> Result<()> {
        self.connection().execute(
            "DELETE FROM auto_resolution_pair WHERE rule_id = ?1",
            params![rule_id],
        )?;
        Ok(())
    }

    /// Queue failed pairs for another test, e.g. after the comparator changed.
    pub fn reset_failed_tests(&self, rule_id: RuleId) -> Result<usize> {
        self.connection().execute(
            "UPDATE auto_resolution_pair SET status = ?2 WHERE rule_id = ?1 AND status = ?3",
            params![
                rule_id,
                PairStatus::MatchesSearchButNotTested,
                PairStatus::MatchesSearchFailedTest
            ],
        )
    }
}
