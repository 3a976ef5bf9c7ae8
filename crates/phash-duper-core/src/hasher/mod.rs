mod content;
mod perceptual;

pub use content::{content_hash, hash_data};
pub use perceptual::{hash_image_file, perceptual_hash_of, pixel_hash_of, ImageHashes};

use crate::progress::ProgressReporter;
use dashmap::DashMap;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::error;

/// One distinct image file content and every path it was found at.
#[derive(Debug, Clone)]
pub struct HashedImage {
    pub content_hash: u64,
    pub file_size: u64,
    pub hashes: ImageHashes,
    pub paths: Vec<PathBuf>,
}

/// Hash every scanned image in parallel, keyed by content hash. Byte-identical files are
/// decoded once. Files that fail to read or decode are logged and left out.
pub fn build_image_hash_map(
    files: DashMap<PathBuf, u64>,
    reporter: &dyn ProgressReporter,
) -> DashMap<u64, HashedImage> {
    let images: DashMap<u64, HashedImage> = DashMap::new();
    let total = files.len();
    let done = AtomicUsize::new(0);

    let files: Vec<(PathBuf, u64)> = files.into_iter().collect();
    files.par_iter().for_each(|(path, size)| {
        let hashed = done.fetch_add(1, Ordering::Relaxed) + 1;
        reporter.on_hash_progress(hashed, total);

        let content_hash = match content_hash(path) {
            Ok(hash) => hash,
            Err(e) => {
                error!("Error reading file '{}': {}", path.display(), e);
                return;
            }
        };

        if let Some(mut existing) = images.get_mut(&content_hash) {
            existing.paths.push(path.clone());
            return;
        }

        match hash_image_file(path) {
            Ok(hashes) => {
                images
                    .entry(content_hash)
                    .or_insert_with(|| HashedImage {
                        content_hash,
                        file_size: *size,
                        hashes,
                        paths: Vec::new(),
                    })
                    .paths
                    .push(path.clone());
            }
            Err(e) => error!("Error decoding image '{}': {}", path.display(), e),
        }
    });

    images
}
