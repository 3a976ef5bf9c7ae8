use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub root_paths: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Hamming distance used when discovering potential duplicates.
    #[serde(default = "default_search_distance")]
    pub search_distance: u32,
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: i64,
    #[serde(default = "default_max_root_candidates")]
    pub max_root_candidates: usize,
    #[serde(default = "default_max_root_sample")]
    pub max_root_sample: usize,
    #[serde(default = "default_pair_block_size")]
    pub pair_block_size: usize,
    #[serde(default = "default_auto_resolution_page_size")]
    pub auto_resolution_page_size: usize,
    #[serde(default = "default_discovery_chunk_size")]
    pub discovery_chunk_size: usize,
    /// Wall-clock budget for maintenance commands, in seconds.
    #[serde(default = "default_maintenance_seconds")]
    pub maintenance_seconds: u64,
}

fn default_database_path() -> String {
    "phash_duper.db".to_string()
}

fn default_search_distance() -> u32 {
    8
}

fn default_rebalance_threshold() -> i64 {
    16
}

fn default_max_root_candidates() -> usize {
    256
}

fn default_max_root_sample() -> usize {
    64
}

fn default_pair_block_size() -> usize {
    4096
}

fn default_auto_resolution_page_size() -> usize {
    8192
}

fn default_discovery_chunk_size() -> usize {
    256
}

fn default_maintenance_seconds() -> u64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            root_paths: Vec::new(),
            ignore_patterns: Vec::new(),
            database_path: default_database_path(),
            search_distance: default_search_distance(),
            rebalance_threshold: default_rebalance_threshold(),
            max_root_candidates: default_max_root_candidates(),
            max_root_sample: default_max_root_sample(),
            pair_block_size: default_pair_block_size(),
            auto_resolution_page_size: default_auto_resolution_page_size(),
            discovery_chunk_size: default_discovery_chunk_size(),
            maintenance_seconds: default_maintenance_seconds(),
        }
    }
}

/// Load `Config.toml` (optional) with `PHASH_DUPER_*` environment overrides on top.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("PHASH_DUPER")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("root_paths")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        if result.iter().any(|kept| dir_path.starts_with(Path::new(kept))) {
            continue;
        }
        result.retain(|kept| !Path::new(kept).starts_with(dir_path));
        result.push(dir);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = vec![
            "/home/user/photos".to_string(),
            "/home/user/scans".to_string(),
            "/var/media".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_non_overlapping_parent_listed_after_children() {
        let dirs = vec![
            "/home/user/photos/2019".to_string(),
            "/home/user/photos/2020".to_string(),
            "/home/user/photos".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        // both year folders sit under the later parent
        assert_eq!(result, vec!["/home/user/photos".to_string()]);
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = vec![
            "/home/user".to_string(),
            "/home/user/photos".to_string(),
            "/var/media".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result.len(), 2);
        assert!(result.contains(&"/home/user".to_string()));
        assert!(!result.contains(&"/home/user/photos".to_string()));
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config: AppConfig = Config::builder()
            .set_override("root_paths", vec!["/photos"])
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.root_paths, vec!["/photos".to_string()]);
        assert_eq!(config.search_distance, 8);
        assert_eq!(config.rebalance_threshold, 16);
        assert_eq!(config.auto_resolution_page_size, 8192);
        assert_eq!(config.database_path, "phash_duper.db");
    }
}
