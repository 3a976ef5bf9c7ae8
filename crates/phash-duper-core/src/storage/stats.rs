use super::models::IndexStats;
use super::sqlite::Database;
use rusqlite::Result;

impl Database {
    /// Table sizes for the status report. `search_distance` decides which files count as
    /// awaiting a search.
    pub fn index_stats(&self, search_distance: u32) -> Result<IndexStats> {
        let count = |sql: &str| -> Result<i64> {
            self.connection().query_row(sql, [], |row| row.get(0))
        };
        Ok(IndexStats {
            files: self.file_count()?,
            perceptual_hashes: self.perceptual_hash_count()?,
            tree_nodes: self.vp_tree_node_count()?,
            queued_rebalances: count("SELECT COUNT(*) FROM rebalance_queue")?,
            files_awaiting_search: self.count_files_needing_search(search_distance)?,
            media: self.media_count()?,
            alternates_groups: self.alternates_group_count()?,
            potential_pairs: self.potential_pair_count()?,
        })
    }
}
