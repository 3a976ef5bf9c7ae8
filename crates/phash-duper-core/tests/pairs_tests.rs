use phash_duper_core::budget::{WorkBudget, WorkOutcome};
use phash_duper_core::collaborators::{DomainFilter, HashStore, Predicates};
use phash_duper_core::discovery::search_for_potentials;
use phash_duper_core::pairs::{
    FileSearchContext, PairRelation, PairSort, PairSortKey, PixelDuplicates,
};
use phash_duper_core::storage::models::*;
use phash_duper_core::storage::Database;
use phash_duper_core::{
    IndexSettings, PerceptualHash, PotentialDuplicatesSearchContext, PotentialPairFinder,
    SilentReporter, SimilarityIndex,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn new_media(db: &Database, content: u64) -> (FileId, MediaId) {
    let file_id = db.get_or_create_id(content).unwrap();
    let media_id = db.get_or_create_media(file_id).unwrap();
    (file_id, media_id)
}

fn tag(db: &Database, file_id: FileId, tags: &[&str]) {
    for t in tags {
        db.add_file_tag(file_id, t).unwrap();
    }
}

fn search_for(tags: &[&str]) -> FileSearchContext {
    FileSearchContext {
        domain: DomainFilter::All,
        predicates: Predicates {
            required_tags: tags.iter().map(|t| t.to_string()).collect(),
            excluded_tags: vec![],
        },
    }
}

fn fetch_all(finder: &PotentialPairFinder<'_>, context: &PotentialDuplicatesSearchContext) -> Vec<PotentialPair> {
    finder
        .fetch(context, PairSort::default(), None, &WorkBudget::unlimited())
        .unwrap()
        .pairs
}

#[test]
fn test_three_file_scenario() {
    let db = Database::open_in_memory().unwrap();
    let mut index = SimilarityIndex::open(&db, IndexSettings::default()).unwrap();
    let f1 = db.get_or_create_id(1).unwrap();
    let f2 = db.get_or_create_id(2).unwrap();
    let f3 = db.get_or_create_id(3).unwrap();
    index.associate(f1, &[PerceptualHash(0)]).unwrap();
    index.associate(f2, &[PerceptualHash(1)]).unwrap();
    index.associate(f3, &[PerceptualHash(u64::MAX)]).unwrap();

    let report = search_for_potentials(&index, 1, 16, &WorkBudget::unlimited(), &SilentReporter)
        .unwrap();
    assert_eq!(report.outcome, WorkOutcome::Finished);
    assert_eq!(report.files_searched, 3);
    assert_eq!(report.pairs_added, 1);

    let m1 = db.media_for_file(f1).unwrap().unwrap();
    let m2 = db.media_for_file(f2).unwrap().unwrap();
    let pair = db.potential_pair(m1, m2).unwrap().unwrap();
    assert_eq!(pair.distance, 1);
    assert_eq!(db.potential_pair_count().unwrap(), 1);

    let finder = PotentialPairFinder::new(&db, 64);
    let within_one = PotentialDuplicatesSearchContext::with_max_distance(1);
    assert_eq!(fetch_all(&finder, &within_one), vec![pair]);
    let exact = PotentialDuplicatesSearchContext::with_max_distance(0);
    assert!(fetch_all(&finder, &exact).is_empty());

    // nothing left to search at this distance
    let again = search_for_potentials(&index, 1, 16, &WorkBudget::unlimited(), &SilentReporter)
        .unwrap();
    assert_eq!(again.files_searched, 0);
}

#[test]
fn test_discovery_respects_false_positives() {
    let db = Database::open_in_memory().unwrap();
    let mut index = SimilarityIndex::open(&db, IndexSettings::default()).unwrap();
    let (f1, m1) = new_media(&db, 1);
    let (f2, m2) = new_media(&db, 2);
    assert!(db.set_false_positive_media(m1, m2).unwrap());
    index.associate(f1, &[PerceptualHash(0)]).unwrap();
    index.associate(f2, &[PerceptualHash(0)]).unwrap();

    let report = search_for_potentials(&index, 4, 16, &WorkBudget::unlimited(), &SilentReporter)
        .unwrap();
    assert_eq!(report.pairs_added, 0);
    assert_eq!(db.potential_pair_count().unwrap(), 0);
}

#[test]
fn test_relation_modes() {
    let db = Database::open_in_memory().unwrap();
    let (f1, m1) = new_media(&db, 1);
    let (f2, m2) = new_media(&db, 2);
    let (f3, m3) = new_media(&db, 3);
    let (_, m4) = new_media(&db, 4);
    tag(&db, f1, &["camera"]);
    tag(&db, f2, &["camera"]);
    tag(&db, f3, &["scan"]);
    db.add_potential_pairs(m1, &[(m2, 1), (m3, 2), (m4, 3)]).unwrap();
    db.add_potential_pairs(m3, &[(m4, 1)]).unwrap();

    let finder = PotentialPairFinder::new(&db, 64);
    let mut context = PotentialDuplicatesSearchContext::with_max_distance(8);
    context.search1 = search_for(&["camera"]);

    context.relation = PairRelation::EitherMatches;
    let either = fetch_all(&finder, &context);
    assert_eq!(
        either.iter().map(|p| p.key()).collect::<Vec<_>>(),
        vec![(m1, m2), (m1, m3), (m1, m4)]
    );

    context.relation = PairRelation::BothMatchSame;
    let both = fetch_all(&finder, &context);
    assert_eq!(both.iter().map(|p| p.key()).collect::<Vec<_>>(), vec![(m1, m2)]);

    context.relation = PairRelation::BothMatchDifferent;
    context.search2 = search_for(&["scan"]);
    let crossed = fetch_all(&finder, &context);
    assert_eq!(crossed.iter().map(|p| p.key()).collect::<Vec<_>>(), vec![(m1, m3)]);

    let total = finder.count(&context, &WorkBudget::unlimited()).unwrap();
    assert_eq!(total.count, 1);
    assert_eq!(total.outcome, WorkOutcome::Finished);
}

#[test]
fn test_excluded_tags() {
    let db = Database::open_in_memory().unwrap();
    let (f1, m1) = new_media(&db, 1);
    let (f2, m2) = new_media(&db, 2);
    tag(&db, f1, &["camera", "private"]);
    tag(&db, f2, &["camera"]);
    db.add_potential_pairs(m1, &[(m2, 1)]).unwrap();

    let finder = PotentialPairFinder::new(&db, 64);
    let mut context = PotentialDuplicatesSearchContext::with_max_distance(8);
    context.relation = PairRelation::BothMatchSame;
    context.search1.predicates.excluded_tags = vec!["private".into()];
    assert!(fetch_all(&finder, &context).is_empty());

    context.relation = PairRelation::EitherMatches;
    assert_eq!(fetch_all(&finder, &context).len(), 1);
}

#[test]
fn test_domain_filter_applies_to_both_kings() {
    let db = Database::open_in_memory().unwrap();
    let (f1, m1) = new_media(&db, 1);
    let (f2, m2) = new_media(&db, 2);
    let (_, m3) = new_media(&db, 3);
    let photos = db.get_or_create_domain("photos").unwrap();
    db.add_file_to_domain(photos, f1).unwrap();
    db.add_file_to_domain(photos, f2).unwrap();
    db.add_potential_pairs(m1, &[(m2, 1), (m3, 1)]).unwrap();

    let finder = PotentialPairFinder::new(&db, 64);
    let mut context = PotentialDuplicatesSearchContext::with_max_distance(8);
    context.search1.domain = DomainFilter::Domains(vec![photos]);
    let pairs = fetch_all(&finder, &context);
    assert_eq!(pairs.iter().map(|p| p.key()).collect::<Vec<_>>(), vec![(m1, m2)]);

    // leaving the domain drops the pair
    db.remove_file_from_domain(photos, f2).unwrap();
    assert!(fetch_all(&finder, &context).is_empty());
}

#[test]
fn test_pixel_duplicate_constraint() {
    let db = Database::open_in_memory().unwrap();
    let (f1, m1) = new_media(&db, 1);
    let (f2, m2) = new_media(&db, 2);
    let (f3, m3) = new_media(&db, 3);
    let (_, m4) = new_media(&db, 4);
    db.set_pixel_hash(f1, &[7u8; 32]).unwrap();
    db.set_pixel_hash(f2, &[7u8; 32]).unwrap();
    db.set_pixel_hash(f3, &[9u8; 32]).unwrap();
    db.add_potential_pairs(m1, &[(m2, 0), (m3, 0), (m4, 0)]).unwrap();

    let finder = PotentialPairFinder::new(&db, 64);
    let mut context = PotentialDuplicatesSearchContext::with_max_distance(0);

    context.pixel_duplicates = PixelDuplicates::Required;
    let required = fetch_all(&finder, &context);
    assert_eq!(required.iter().map(|p| p.key()).collect::<Vec<_>>(), vec![(m1, m2)]);

    // a missing pixel hash never counts as a match
    context.pixel_duplicates = PixelDuplicates::Excluded;
    let excluded = fetch_all(&finder, &context);
    assert_eq!(
        excluded.iter().map(|p| p.key()).collect::<Vec<_>>(),
        vec![(m1, m3), (m1, m4)]
    );

    context.pixel_duplicates = PixelDuplicates::Allowed;
    assert_eq!(fetch_all(&finder, &context).len(), 3);
}

#[test]
fn test_fetch_sorts_and_limits_across_blocks() {
    let db = Database::open_in_memory().unwrap();
    let created: Vec<(FileId, MediaId)> = (1..=6).map(|i| new_media(&db, i)).collect();
    let media: Vec<MediaId> = created.iter().map(|(_, m)| *m).collect();
    let distances = [5u32, 1, 4, 2, 3];
    for (other, distance) in media[1..].iter().zip(distances) {
        db.add_potential_pairs(media[0], &[(*other, distance)]).unwrap();
    }

    // blocks of two force several fragments
    let finder = PotentialPairFinder::new(&db, 2);
    let context = PotentialDuplicatesSearchContext::with_max_distance(4);

    let sorted = finder
        .fetch(&context, PairSort::default(), None, &WorkBudget::unlimited())
        .unwrap();
    assert_eq!(
        sorted.pairs.iter().map(|p| p.distance).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );

    let closest = finder
        .fetch(&context, PairSort::default(), Some(2), &WorkBudget::unlimited())
        .unwrap();
    assert_eq!(
        closest.pairs.iter().map(|p| p.distance).collect::<Vec<_>>(),
        vec![1, 2]
    );

    let furthest = PairSort {
        key: PairSortKey::Distance,
        ascending: false,
    };
    let top = finder
        .fetch(&context, furthest, Some(1), &WorkBudget::unlimited())
        .unwrap();
    assert_eq!(top.pairs[0].distance, 4);

    let by_id = PairSort {
        key: PairSortKey::MediaId,
        ascending: false,
    };
    let desc = finder
        .fetch(&context, by_id, None, &WorkBudget::unlimited())
        .unwrap();
    let larger: Vec<MediaId> = desc.pairs.iter().map(|p| p.larger).collect();
    assert_eq!(larger, vec![media[5], media[4], media[3], media[2]]);

    for ((file_id, _), size) in created.iter().zip([100i64, 10, 40, 20, 30, 50]) {
        db.upsert_file_location(&format!("/photos/{}.png", file_id), *file_id, size)
            .unwrap();
    }
    let by_size = PairSort {
        key: PairSortKey::Size,
        ascending: true,
    };
    let smallest_first = finder
        .fetch(&context, by_size, None, &WorkBudget::unlimited())
        .unwrap();
    let larger: Vec<MediaId> = smallest_first.pairs.iter().map(|p| p.larger).collect();
    assert_eq!(larger, vec![media[1], media[3], media[4], media[2]]);

    let biggest = finder
        .fetch(
            &context,
            PairSort {
                key: PairSortKey::Size,
                ascending: false,
            },
            Some(1),
            &WorkBudget::unlimited(),
        )
        .unwrap();
    assert_eq!(biggest.pairs[0].larger, media[2]);

    assert_eq!(finder.count(&context, &WorkBudget::unlimited()).unwrap().count, 4);
}

#[test]
fn test_expired_budget_interrupts_count() {
    let db = Database::open_in_memory().unwrap();
    let (_, m1) = new_media(&db, 1);
    let (_, m2) = new_media(&db, 2);
    db.add_potential_pairs(m1, &[(m2, 1)]).unwrap();

    let finder = PotentialPairFinder::new(&db, 64);
    let budget = WorkBudget {
        deadline: Some(std::time::Instant::now()),
        cancel: None,
    };
    let context = PotentialDuplicatesSearchContext::default();
    let count = finder.count(&context, &budget).unwrap();
    assert_eq!(count.outcome, WorkOutcome::Interrupted);
    assert_eq!(count.count, 0);

    let fetched = finder.fetch(&context, PairSort::default(), None, &budget).unwrap();
    assert_eq!(fetched.outcome, WorkOutcome::Interrupted);
    assert!(fetched.pairs.is_empty());
}

#[test]
fn test_random_sample_returns_one_media_worth() {
    let db = Database::open_in_memory().unwrap();
    let (_, m1) = new_media(&db, 1);
    let (_, m2) = new_media(&db, 2);
    let (_, m3) = new_media(&db, 3);
    let (_, m4) = new_media(&db, 4);
    db.add_potential_pairs(m1, &[(m2, 1), (m3, 1)]).unwrap();
    db.add_potential_pairs(m4, &[(m3, 1)]).unwrap();

    let finder = PotentialPairFinder::new(&db, 64);
    let context = PotentialDuplicatesSearchContext::default();
    let mut rng = StdRng::seed_from_u64(21);
    for _ in 0..20 {
        let sample = finder.random_sample(&context, &mut rng).unwrap();
        assert!(!sample.is_empty());
        let shared = [sample[0].smaller, sample[0].larger]
            .into_iter()
            .find(|m| sample.iter().all(|p| p.involves(*m)));
        assert!(shared.is_some(), "sample does not share a media: {:?}", sample);
    }

    let none = PotentialDuplicatesSearchContext::with_max_distance(0);
    assert!(finder.random_sample(&none, &mut rng).unwrap().is_empty());
}

#[test]
fn test_filter_fragment_reports_each_pair_once() {
    let db = Database::open_in_memory().unwrap();
    let (_, m1) = new_media(&db, 1);
    let (_, m2) = new_media(&db, 2);
    db.add_potential_pairs(m1, &[(m2, 1)]).unwrap();
    let pair = db.potential_pair(m1, m2).unwrap().unwrap();

    let finder = PotentialPairFinder::new(&db, 64);
    let filtered = finder
        .filter_fragment(&PotentialDuplicatesSearchContext::default(), &[pair, pair])
        .unwrap();
    assert_eq!(filtered, vec![pair]);
}
