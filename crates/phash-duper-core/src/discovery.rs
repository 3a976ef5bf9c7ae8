use crate::budget::{WorkBudget, WorkOutcome};
use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::similarity::SimilarityIndex;
use crate::storage::models::{FileId, MediaId};
use ahash::AHashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub files_searched: usize,
    pub pairs_added: usize,
    pub outcome: WorkOutcome,
}

/// Search every file not yet searched out to `distance` and record what it finds as potential
/// pairs between media. One chunk of files per transaction.
pub fn search_for_potentials(
    index: &SimilarityIndex<'_>,
    distance: u32,
    chunk_size: usize,
    budget: &WorkBudget,
    reporter: &dyn ProgressReporter,
) -> Result<DiscoveryReport, Error> {
    let db = index.database();
    let chunk_size = chunk_size.max(1);
    let mut report = DiscoveryReport {
        files_searched: 0,
        pairs_added: 0,
        outcome: WorkOutcome::Finished,
    };

    loop {
        if budget.should_stop() {
            report.outcome = WorkOutcome::Interrupted;
            break;
        }
        let files = db.files_needing_search(distance, chunk_size)?;
        if files.is_empty() {
            break;
        }

        let added = db.in_transaction(|| {
            let mut added = 0;
            for &file_id in &files {
                added += record_potentials_for(index, file_id, distance)?;
            }
            Ok::<_, Error>(added)
        })?;

        report.files_searched += files.len();
        report.pairs_added += added;
        reporter.on_discovery_progress(report.files_searched, report.pairs_added);
        debug!("Searched {} files, {} new pairs", files.len(), added);

        if files.len() < chunk_size {
            break;
        }
    }

    info!(
        "Potential discovery at distance {}: {} files searched, {} pairs added ({:?})",
        distance, report.files_searched, report.pairs_added, report.outcome
    );
    Ok(report)
}

fn record_potentials_for(
    index: &SimilarityIndex<'_>,
    file_id: FileId,
    distance: u32,
) -> Result<usize, Error> {
    let db = index.database();
    let hits = index.search_file(file_id, distance)?;
    let media_id = db.get_or_create_media(file_id)?;

    let mut by_media: AHashMap<MediaId, u32> = AHashMap::new();
    for (other_file, d) in hits {
        if other_file == file_id {
            continue;
        }
        let other_media = db.get_or_create_media(other_file)?;
        by_media
            .entry(other_media)
            .and_modify(|best| *best = (*best).min(d))
            .or_insert(d);
    }

    let mut candidates: Vec<(MediaId, u32)> = by_media.into_iter().collect();
    candidates.sort();
    let added = db.add_potential_pairs(media_id, &candidates)?;
    db.set_searched_distance(file_id, distance)?;
    Ok(added)
}
