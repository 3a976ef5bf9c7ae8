use super::SimilarityIndex;
use crate::error::Error;
use crate::phash::PerceptualHash;
use crate::storage::models::{FileId, PerceptualHashId};
use ahash::AHashMap;
use std::collections::hash_map::Entry;

fn keep_minimum<K: std::hash::Hash + Eq>(map: &mut AHashMap<K, u32>, key: K, distance: u32) {
    match map.entry(key) {
        Entry::Occupied(mut e) => {
            if distance < *e.get() {
                e.insert(distance);
            }
        }
        Entry::Vacant(e) => {
            e.insert(distance);
        }
    }
}

impl<'db> SimilarityIndex<'db> {
    /// Every indexed hash within `max_distance` of any of `hashes`, with its best distance.
    pub fn search_hashes(
        &self,
        hashes: &[PerceptualHash],
        max_distance: u32,
    ) -> Result<AHashMap<PerceptualHashId, u32>, Error> {
        let mut found: AHashMap<PerceptualHashId, u32> = AHashMap::new();

        if max_distance == 0 {
            for phash in hashes {
                if let Some(hash_id) = self.db.perceptual_hash_id(*phash)? {
                    found.insert(hash_id, 0);
                }
            }
            return Ok(found);
        }

        let Some(root) = self.root else {
            return Ok(found);
        };

        for query in hashes {
            let mut batch = vec![root];
            while !batch.is_empty() {
                let mut next = Vec::new();
                for hash_id in batch {
                    let node = self.expect_node(hash_id)?;
                    let distance = node.phash.distance(query);
                    if distance <= max_distance {
                        keep_minimum(&mut found, node.hash_id, distance);
                    }

                    match node.radius {
                        Some(radius) => {
                            // Skip when the two spheres are disjoint.
                            if let Some(inner) = node.inner_id {
                                if distance <= radius.saturating_add(max_distance) {
                                    next.push(inner);
                                }
                            }
                            // Skip when the search sphere sits inside the node sphere.
                            if let Some(outer) = node.outer_id {
                                if distance.saturating_add(max_distance) > radius {
                                    next.push(outer);
                                }
                            }
                        }
                        None => {
                            next.extend(node.inner_id);
                            next.extend(node.outer_id);
                        }
                    }
                }
                batch = next;
            }
        }

        Ok(found)
    }

    /// Files sharing a hash within `max_distance` of any hash of `file_id`. The file itself is
    /// part of the result at distance 0.
    pub fn search_file(
        &self,
        file_id: FileId,
        max_distance: u32,
    ) -> Result<AHashMap<FileId, u32>, Error> {
        let hashes: Vec<PerceptualHash> = self
            .db
            .file_perceptual_hashes(file_id)?
            .into_iter()
            .map(|(_, phash)| phash)
            .collect();
        self.search_files(&hashes, max_distance)
    }

    /// Like [`search_hashes`](Self::search_hashes), mapped back to files with the minimum
    /// distance per file.
    pub fn search_files(
        &self,
        hashes: &[PerceptualHash],
        max_distance: u32,
    ) -> Result<AHashMap<FileId, u32>, Error> {
        let by_hash = self.search_hashes(hashes, max_distance)?;
        let mut by_file: AHashMap<FileId, u32> = AHashMap::with_capacity(by_hash.len());
        for (hash_id, distance) in by_hash {
            for file_id in self.db.files_for_perceptual_hash(hash_id)? {
                keep_minimum(&mut by_file, file_id, distance);
            }
        }
        Ok(by_file)
    }
}
