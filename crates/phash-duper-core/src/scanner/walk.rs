use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::error;

/// Extensions decoded by the ingest pipeline, lowercase.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "ico", "tga", "pnm", "qoi",
];

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Parallel directory traversal. Builds a map of image path → file size, filtering by glob
/// ignore patterns. Skips symlinks, 0-byte files and anything without an image extension.
pub fn build_image_file_map(
    root_paths: &[&str],
    ignore_globs: &[&str],
) -> io::Result<DashMap<PathBuf, u64>> {
    let map: DashMap<PathBuf, u64> = DashMap::new();

    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    root_paths
        .par_iter()
        .try_for_each(|root_dir| visit_dirs(Path::new(root_dir), &map, &ignore_patterns))?;

    Ok(map)
}

fn visit_dirs(
    dir: &Path,
    map: &DashMap<PathBuf, u64>,
    ignore_patterns: &[Pattern],
) -> io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    if ignore_patterns
        .iter()
        .any(|pattern| pattern.matches_path(dir))
    {
        return Ok(());
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            error!("Access denied reading directory {}: {}", dir.display(), err);
            return Ok(());
        }
        Err(err) => {
            return Err(io::Error::new(
                err.kind(),
                format!("Error reading directory {}: {}", dir.display(), err),
            ));
        }
    };

    entries.par_bridge().try_for_each(|entry_result| -> io::Result<()> {
        let entry = entry_result.map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("Error reading entry in directory {}: {}", dir.display(), err),
            )
        })?;

        let path = entry.path();
        let metadata = fs::symlink_metadata(&path).map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("Error getting metadata for {}: {}", path.display(), err),
            )
        })?;

        if metadata.file_type().is_symlink() {
            return Ok(());
        }
        if metadata.is_dir() {
            visit_dirs(&path, map, ignore_patterns)?;
        } else if metadata.len() > 0
            && is_image_path(&path)
            && !ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(&path))
        {
            map.insert(path, metadata.len());
        }
        Ok(())
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_image_path() {
        assert!(is_image_path(Path::new("/photos/a.JPG")));
        assert!(is_image_path(Path::new("b.png")));
        assert!(!is_image_path(Path::new("notes.txt")));
        assert!(!is_image_path(Path::new("no_extension")));
    }
}
