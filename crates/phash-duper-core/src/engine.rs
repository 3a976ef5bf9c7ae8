use crate::budget::WorkBudget;
use crate::collaborators::HashStore;
use crate::config::{self, AppConfig};
use crate::discovery::{self, DiscoveryReport};
use crate::error::Error;
use crate::hasher::{self, HashedImage};
use crate::progress::ProgressReporter;
use crate::scanner;
use crate::similarity::{IndexSettings, MaintenanceReport, SimilarityIndex};
use crate::storage::models::DomainId;
use crate::storage::Database;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Images written per transaction during ingest.
const INGEST_CHUNK: usize = 512;

pub struct DupeEngine {
    config: AppConfig,
    db_path: String,
}

#[derive(Debug)]
pub struct IngestResult {
    pub scan_duration: Duration,
    pub hash_duration: Duration,
    pub index_duration: Duration,
    pub files_scanned: usize,
    pub distinct_images: usize,
    pub images_indexed: usize,
}

#[derive(Debug)]
pub struct MaintainResult {
    pub maintenance: MaintenanceReport,
    pub discovery: Option<DiscoveryReport>,
}

impl DupeEngine {
    pub fn new(config: AppConfig) -> Self {
        let db_path = config.database_path.clone();
        Self { config, db_path }
    }

    pub fn with_db_path(mut self, path: &str) -> Self {
        self.db_path = path.to_string();
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn open_database(&self) -> Result<Database, Error> {
        Ok(Database::open(&self.db_path)?)
    }

    /// Run the ingest pipeline:
    /// 1. Parallel directory scan for image files
    /// 2. Parallel content, perceptual and pixel hashing
    /// 3. Record files, domains and tags, and associate perceptual hashes with the index
    ///
    /// Returns [`Error::Cancelled`] when `budget` runs out between phases or chunks. Chunks
    /// already written stay committed, so a later run picks up where this one stopped.
    pub fn ingest(
        &self,
        budget: &WorkBudget,
        reporter: &dyn ProgressReporter,
    ) -> Result<IngestResult, Error> {
        let roots = config::non_overlapping_directories(self.config.root_paths.clone());
        info!("Processing directories: {:?}", roots);

        let root_slices: Vec<&str> = roots.iter().map(|s| s.as_str()).collect();
        let ignore_slices: Vec<&str> =
            self.config.ignore_patterns.iter().map(|s| s.as_str()).collect();

        // Phase 1: Scan
        info!("Scanning for images...");
        reporter.on_scan_start();
        let scan_start = Instant::now();
        let files = scanner::build_image_file_map(&root_slices, &ignore_slices)?;
        let scan_duration = scan_start.elapsed();
        let files_scanned = files.len();
        reporter.on_scan_complete(files_scanned, scan_duration.as_secs_f64());
        debug!(
            "Scan completed in {:.2}s, {} image files",
            scan_duration.as_secs_f64(),
            files_scanned
        );

        if budget.should_stop() {
            return Err(Error::Cancelled);
        }

        // Phase 2: Hash
        info!("Hashing images...");
        reporter.on_hash_start(files_scanned);
        let hash_start = Instant::now();
        let image_map = hasher::build_image_hash_map(files, reporter);
        let hash_duration = hash_start.elapsed();
        let mut images: Vec<HashedImage> = image_map.into_iter().map(|(_, image)| image).collect();
        images.sort_by_key(|image| image.content_hash);
        reporter.on_hash_complete(images.len(), hash_duration.as_secs_f64());
        debug!(
            "Hash completed in {:.2}s, {} distinct images",
            hash_duration.as_secs_f64(),
            images.len()
        );

        if budget.should_stop() {
            return Err(Error::Cancelled);
        }

        // Phase 3: Index
        info!("Writing to index...");
        reporter.on_index_start(images.len());
        let index_start = Instant::now();
        let db = self.open_database()?;
        let mut index = SimilarityIndex::open(&db, IndexSettings::from(&self.config))?;
        let domains: Vec<(String, DomainId)> = roots
            .iter()
            .map(|root| Ok((root.clone(), db.get_or_create_domain(root)?)))
            .collect::<Result<_, Error>>()?;

        let mut indexed = 0;
        for chunk in images.chunks(INGEST_CHUNK) {
            if budget.should_stop() {
                info!("Ingest stopped after {} of {} images", indexed, images.len());
                return Err(Error::Cancelled);
            }
            db.in_transaction(|| {
                for image in chunk {
                    record_image(&db, &mut index, &domains, image)?;
                }
                Ok::<_, Error>(())
            })?;
            indexed += chunk.len();
            reporter.on_index_progress(indexed, images.len());
        }
        let index_duration = index_start.elapsed();
        reporter.on_index_complete(indexed, index_duration.as_secs_f64());
        debug!(
            "Index write completed in {:.2}s, {} images",
            index_duration.as_secs_f64(),
            indexed
        );

        Ok(IngestResult {
            scan_duration,
            hash_duration,
            index_duration,
            files_scanned,
            distinct_images: images.len(),
            images_indexed: indexed,
        })
    }

    /// Rebalance the tree, then search for new potential pairs, both within `budget`.
    pub fn maintain(
        &self,
        budget: &WorkBudget,
        reporter: &dyn ProgressReporter,
    ) -> Result<MaintainResult, Error> {
        let db = self.open_database()?;
        let mut index = SimilarityIndex::open(&db, IndexSettings::from(&self.config))?;
        let maintenance = index.maintain(budget, reporter)?;
        if !maintenance.outcome.is_finished() {
            return Ok(MaintainResult {
                maintenance,
                discovery: None,
            });
        }
        let discovery = discovery::search_for_potentials(
            &index,
            self.config.search_distance,
            self.config.discovery_chunk_size,
            budget,
            reporter,
        )?;
        Ok(MaintainResult {
            maintenance,
            discovery: Some(discovery),
        })
    }
}

fn record_image(
    db: &Database,
    index: &mut SimilarityIndex<'_>,
    domains: &[(String, DomainId)],
    image: &HashedImage,
) -> Result<(), Error> {
    let file_id = db.get_or_create_id(image.content_hash)?;
    for path in &image.paths {
        let path_str = path.to_string_lossy();
        db.upsert_file_location(&path_str, file_id, image.file_size as i64)?;
        for (root, domain) in domains {
            if path.starts_with(Path::new(root)) {
                db.add_file_to_domain(*domain, file_id)?;
            }
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            db.add_file_tag(file_id, &format!("ext:{}", ext.to_ascii_lowercase()))?;
        }
    }
    db.set_pixel_hash(file_id, &image.hashes.pixel_hash)?;

    let known: Vec<_> = db
        .file_perceptual_hashes(file_id)?
        .into_iter()
        .map(|(_, phash)| phash)
        .collect();
    if !known.contains(&image.hashes.phash) {
        index.associate(file_id, &[image.hashes.phash])?;
    }
    Ok(())
}
