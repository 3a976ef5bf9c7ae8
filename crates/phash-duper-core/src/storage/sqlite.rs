use rusqlite::{Connection, Result};
use tracing::{debug, warn};

const SCHEMA_VERSION: i64 = 1;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA mmap_size = 268435456;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 64MB cache, 256MB mmap)");
        Ok(())
    }

    /// Check schema version and create missing tables.
    /// Everything is additive at version 1, so the schema script is simply re-applied.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version > SCHEMA_VERSION {
            warn!(
                "Database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            );
        } else if version < SCHEMA_VERSION {
            debug!("Schema version {} < {}, initializing tables", version, SCHEMA_VERSION);
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a transaction. When a transaction is already open on this connection
    /// the closure joins it, so compound mutators commit as one unit with their callers.
    pub fn in_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<rusqlite::Error>,
    {
        if !self.conn.is_autocommit() {
            return f();
        }
        let tx = self.conn.unchecked_transaction()?;
        let value = f()?;
        tx.commit()?;
        Ok(value)
    }

    pub fn truncate_all(&self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM auto_resolution_pair;
             DELETE FROM auto_resolution_rule;
             DELETE FROM potential_pairs;
             DELETE FROM false_positives;
             DELETE FROM confirmed_alternates;
             DELETE FROM alternates_member;
             DELETE FROM alternates_group;
             DELETE FROM media_member;
             DELETE FROM media;
             DELETE FROM search_cache;
             DELETE FROM rebalance_queue;
             DELETE FROM vptree;
             DELETE FROM perceptual_hash_map;
             DELETE FROM perceptual_hash;
             DELETE FROM pixel_hash;
             DELETE FROM file_tag;
             DELETE FROM file_domain_member;
             DELETE FROM file_domain;
             DELETE FROM file_location;
             DELETE FROM file_hash;",
        )?;
        debug!("All tables truncated");
        Ok(())
    }
}
