use super::models::*;
use super::sqlite::Database;
use crate::collaborators::{DomainFilter, FileDomain, HashStore, Predicates, SearchEngine};
use ahash::{AHashMap, AHashSet};
use rusqlite::{params, OptionalExtension, Result};

impl Database {
    // ── File Identity ────────────────────────────────────────────

    pub fn file_id_for_content_hash(&self, content_hash: u64) -> Result<Option<FileId>> {
        self.connection()
            .query_row(
                "SELECT file_id FROM file_hash WHERE content_hash = ?1",
                params![content_hash as i64],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn file_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM file_hash", [], |row| row.get(0))
    }

    // ── File Locations ───────────────────────────────────────────

    pub fn upsert_file_location(&self, path: &str, file_id: FileId, file_size: i64) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.connection()
            .prepare_cached(
                "INSERT INTO file_location (path, file_id, file_size, last_seen_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(path) DO UPDATE SET file_id = excluded.file_id, \
                 file_size = excluded.file_size, last_seen_at = excluded.last_seen_at",
            )?
            .execute(params![path, file_id, file_size, now])?;
        Ok(())
    }

    pub fn file_locations(&self, file_id: FileId) -> Result<Vec<FileLocation>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT file_id, path, file_size, last_seen_at FROM file_location \
             WHERE file_id = ?1 ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![file_id], |row| {
                Ok(FileLocation {
                    file_id: row.get(0)?,
                    path: row.get(1)?,
                    file_size: row.get(2)?,
                    last_seen_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Largest known on-disk size per file.
    pub fn file_sizes(&self) -> Result<AHashMap<FileId, i64>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT file_id, MAX(file_size) FROM file_location GROUP BY file_id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<AHashMap<_, _>>>()?;
        Ok(rows)
    }

    // ── File Domains ─────────────────────────────────────────────

    pub fn get_or_create_domain(&self, name: &str) -> Result<DomainId> {
        if let Some(id) = self.domain_by_name(name)? {
            return Ok(id);
        }
        self.connection()
            .execute("INSERT INTO file_domain (name) VALUES (?1)", params![name])?;
        Ok(DomainId(self.connection().last_insert_rowid()))
    }

    pub fn domain_by_name(&self, name: &str) -> Result<Option<DomainId>> {
        self.connection()
            .query_row(
                "SELECT domain_id FROM file_domain WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn list_domains(&self) -> Result<Vec<(DomainId, String)>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT domain_id, name FROM file_domain ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn add_file_to_domain(&self, domain: DomainId, file_id: FileId) -> Result<()> {
        self.connection()
            .prepare_cached(
                "INSERT OR IGNORE INTO file_domain_member (domain_id, file_id) VALUES (?1, ?2)",
            )?
            .execute(params![domain, file_id])?;
        Ok(())
    }

    pub fn remove_file_from_domain(&self, domain: DomainId, file_id: FileId) -> Result<()> {
        self.connection().execute(
            "DELETE FROM file_domain_member WHERE domain_id = ?1 AND file_id = ?2",
            params![domain, file_id],
        )?;
        Ok(())
    }

    fn file_domains(&self, file_id: FileId) -> Result<Vec<DomainId>> {
        let mut stmt = self
            .connection()
            .prepare_cached("SELECT domain_id FROM file_domain_member WHERE file_id = ?1")?;
        let rows = stmt
            .query_map(params![file_id], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Tags ─────────────────────────────────────────────────────

    pub fn add_file_tag(&self, file_id: FileId, tag: &str) -> Result<()> {
        self.connection()
            .prepare_cached("INSERT OR IGNORE INTO file_tag (file_id, tag) VALUES (?1, ?2)")?
            .execute(params![file_id, tag])?;
        Ok(())
    }

    pub fn file_tags(&self, file_id: FileId) -> Result<Vec<String>> {
        let mut stmt = self
            .connection()
            .prepare_cached("SELECT tag FROM file_tag WHERE file_id = ?1 ORDER BY tag")?;
        let rows = stmt
            .query_map(params![file_id], |row| row.get(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn files_with_tag(&self, tag: &str) -> Result<AHashSet<FileId>> {
        let mut stmt = self
            .connection()
            .prepare_cached("SELECT file_id FROM file_tag WHERE tag = ?1")?;
        let rows = stmt
            .query_map(params![tag], |row| row.get(0))?
            .collect::<Result<AHashSet<_>>>()?;
        Ok(rows)
    }

    fn all_file_ids(&self) -> Result<AHashSet<FileId>> {
        let mut stmt = self.connection().prepare("SELECT file_id FROM file_hash")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<AHashSet<_>>>()?;
        Ok(rows)
    }

    // ── Pixel Identity ───────────────────────────────────────────

    pub fn set_pixel_hash(&self, file_id: FileId, pixel_hash: &[u8]) -> Result<()> {
        self.connection()
            .prepare_cached(
                "INSERT OR REPLACE INTO pixel_hash (file_id, pixel_hash) VALUES (?1, ?2)",
            )?
            .execute(params![file_id, pixel_hash])?;
        Ok(())
    }

    pub fn pixel_hash(&self, file_id: FileId) -> Result<Option<Vec<u8>>> {
        self.connection()
            .prepare_cached("SELECT pixel_hash FROM pixel_hash WHERE file_id = ?1")?
            .query_row(params![file_id], |row| row.get(0))
            .optional()
    }
}

impl HashStore for Database {
    fn get_or_create_id(&self, content_hash: u64) -> Result<FileId> {
        if let Some(id) = self.file_id_for_content_hash(content_hash)? {
            return Ok(id);
        }
        self.connection().execute(
            "INSERT INTO file_hash (content_hash) VALUES (?1)",
            params![content_hash as i64],
        )?;
        Ok(FileId(self.connection().last_insert_rowid()))
    }

    fn resolve(&self, file_id: FileId) -> Result<Option<u64>> {
        self.connection()
            .query_row(
                "SELECT content_hash FROM file_hash WHERE file_id = ?1",
                params![file_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|hash| hash.map(|h| h as u64))
    }
}

impl FileDomain for Database {
    fn resolve_eligible_files(
        &self,
        filter: &DomainFilter,
        file_ids: &[FileId],
    ) -> Result<AHashSet<FileId>> {
        match filter {
            DomainFilter::All => Ok(file_ids.iter().copied().collect()),
            DomainFilter::Domains(domains) => {
                let mut eligible = AHashSet::with_capacity(file_ids.len());
                for &file_id in file_ids {
                    if self
                        .file_domains(file_id)?
                        .iter()
                        .any(|d| domains.contains(d))
                    {
                        eligible.insert(file_id);
                    }
                }
                Ok(eligible)
            }
        }
    }
}

impl SearchEngine for Database {
    fn execute(
        &self,
        predicates: &Predicates,
        candidates: Option<&AHashSet<FileId>>,
    ) -> Result<AHashSet<FileId>> {
        let pool = match (candidates, predicates.required_tags.first()) {
            (Some(candidates), _) => candidates.clone(),
            (None, Some(tag)) => self.files_with_tag(tag)?,
            (None, None) => self.all_file_ids()?,
        };
        if predicates.is_empty() {
            return Ok(pool);
        }

        let mut matched = AHashSet::with_capacity(pool.len());
        for file_id in pool {
            let tags = self.file_tags(file_id)?;
            let has_required = predicates
                .required_tags
                .iter()
                .all(|t| tags.contains(t));
            let has_excluded = predicates
                .excluded_tags
                .iter()
                .any(|t| tags.contains(t));
            if has_required && !has_excluded {
                matched.insert(file_id);
            }
        }
        Ok(matched)
    }
}
