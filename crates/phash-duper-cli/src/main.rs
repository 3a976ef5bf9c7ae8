mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{
    AutoResolveArgs, Cli, Commands, ComparatorArg, ContextArgs, GroupsCommand, PairsCommand,
    PixelArg, RelationArg,
};
use dotenv::dotenv;
use phash_duper_core::collaborators::{DomainFilter, Predicates};
use phash_duper_core::hasher::content_hash;
use phash_duper_core::pairs::{
    FileSearchContext, PairRelation, PairSort, PairSortKey, PixelDuplicates,
};
use phash_duper_core::storage::models::{FileId, MediaId, PotentialPair};
use phash_duper_core::storage::Database;
use phash_duper_core::{
    AppConfig, AutoResolutionEngine, DupeEngine, DuplicateAction, Error as CoreError,
    IndexSettings, PairComparator, PotentialDuplicatesSearchContext, PotentialPairFinder,
    SimilarityIndex, WorkBudget,
};
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match phash_duper_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let engine = DupeEngine::new(config.clone());

    let outcome = match args.command {
        Some(Commands::Ingest { seconds }) => run_ingest(&engine, seconds),
        Some(Commands::Maintain { seconds }) => run_maintain(&engine, seconds),
        Some(Commands::Search { file, distance }) => run_search(&engine, &file, distance),
        Some(Commands::Pairs { command }) => run_pairs(&engine, command),
        Some(Commands::Groups { command }) => run_groups(&engine, command),
        Some(Commands::AutoResolve(args)) => run_auto_resolve(&engine, args),
        Some(Commands::Rules) => run_rules(&engine),
        Some(Commands::Stats) => run_stats(&engine),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            Ok(())
        }
        Some(Commands::TruncateDb) => run_truncate(&engine),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = outcome {
        if err.downcast_ref::<CoreError>().is_some_and(CoreError::is_fatal) {
            error!("Database consistency fault, stopping: {:#}", err);
        } else {
            error!("Error: {:#}", err);
        }
        process::exit(1);
    }

    Ok(())
}

fn budget_for(config: &AppConfig, seconds: Option<u64>) -> WorkBudget {
    WorkBudget::for_duration(Duration::from_secs(
        seconds.unwrap_or(config.maintenance_seconds),
    ))
}

fn run_ingest(engine: &DupeEngine, seconds: Option<u64>) -> Result<()> {
    let reporter = CliReporter::new();
    let budget = match seconds {
        Some(seconds) => WorkBudget::for_duration(Duration::from_secs(seconds)),
        None => WorkBudget::unlimited(),
    };
    let result = match engine.ingest(&budget, &reporter) {
        Ok(result) => result,
        Err(CoreError::Cancelled) => {
            reporter.finish_bar();
            warn!("Ingest stopped at the time limit; run it again to continue");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    println!();
    info!(
        "Scan: {}, Hash: {}, Index: {}",
        format!("{:.2}s", result.scan_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.hash_duration.as_secs_f64()).green(),
        format!("{:.2}s", result.index_duration.as_secs_f64()).green(),
    );
    info!(
        "{} image files, {} distinct images, {} indexed",
        format!("{}", result.files_scanned).cyan(),
        format!("{}", result.distinct_images).cyan(),
        format!("{}", result.images_indexed).cyan(),
    );
    Ok(())
}

fn run_maintain(engine: &DupeEngine, seconds: Option<u64>) -> Result<()> {
    let reporter = CliReporter::new();
    reporter.spinner("Maintaining index...");
    let result = engine.maintain(&budget_for(engine.config(), seconds), &reporter)?;
    reporter.finish_bar();

    let tree = &result.maintenance;
    info!(
        "Rebalanced {} branches ({} nodes, {} orphans removed)",
        format!("{}", tree.branches_rebuilt).green(),
        tree.nodes_rebuilt,
        tree.orphans_removed,
    );
    match result.discovery {
        Some(discovery) => {
            info!(
                "Searched {} files, {} new potential pairs",
                format!("{}", discovery.files_searched).green(),
                format!("{}", discovery.pairs_added).red(),
            );
            if !discovery.outcome.is_finished() {
                info!("{}", "Time budget spent, run again to continue".yellow());
            }
        }
        None => info!("{}", "Time budget spent while rebalancing, run again to continue".yellow()),
    }
    Ok(())
}

/// Accept either an image path or a content hash in hex.
fn resolve_file(db: &Database, arg: &str) -> Result<FileId> {
    let path = Path::new(arg);
    let hash = if path.is_file() {
        content_hash(path).with_context(|| format!("reading {}", arg))?
    } else {
        u64::from_str_radix(arg.trim_start_matches("0x"), 16)
            .with_context(|| format!("'{}' is neither a file nor a content hash", arg))?
    };
    db.file_id_for_content_hash(hash)?
        .ok_or_else(|| anyhow!("{} is not in the index", arg))
}

fn describe_file(db: &Database, file_id: FileId) -> Result<String> {
    let locations = db.file_locations(file_id)?;
    Ok(match locations.first() {
        Some(location) if locations.len() > 1 => {
            format!("{} (+{} copies)", location.path, locations.len() - 1)
        }
        Some(location) => location.path.clone(),
        None => format!("file {}", file_id),
    })
}

fn describe_media(db: &Database, media_id: MediaId) -> Result<String> {
    let king = match db.media_king(media_id)? {
        Some(king) => describe_file(db, king)?,
        None => "<missing>".to_string(),
    };
    Ok(format!("media {} [{}]", media_id, king))
}

fn print_pair(db: &Database, pair: &PotentialPair) -> Result<()> {
    println!(
        "{:>3}  {}  ~  {}",
        format!("{}", pair.distance).yellow(),
        describe_media(db, pair.smaller)?,
        describe_media(db, pair.larger)?,
    );
    Ok(())
}

fn run_search(engine: &DupeEngine, file: &str, distance: Option<u32>) -> Result<()> {
    let db = engine.open_database()?;
    let file_id = resolve_file(&db, file)?;
    let index = SimilarityIndex::open(&db, IndexSettings::from(engine.config()))?;
    let distance = distance.unwrap_or(engine.config().search_distance);

    let mut hits: Vec<(FileId, u32)> = index
        .search_file(file_id, distance)?
        .into_iter()
        .filter(|(other, _)| *other != file_id)
        .collect();
    hits.sort_by_key(|(other, d)| (*d, *other));

    if hits.is_empty() {
        println!("No images within distance {}", distance);
    }
    for (other, d) in hits {
        println!("{:>3}  {}", format!("{}", d).yellow(), describe_file(&db, other)?);
    }
    Ok(())
}

fn domain_filter(db: &Database, names: &[String]) -> Result<DomainFilter> {
    if names.is_empty() {
        return Ok(DomainFilter::All);
    }
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let id = db
            .domain_by_name(name)?
            .ok_or_else(|| anyhow!("unknown domain '{}'", name))?;
        ids.push(id);
    }
    Ok(DomainFilter::Domains(ids))
}

fn build_context(db: &Database, args: &ContextArgs) -> Result<PotentialDuplicatesSearchContext> {
    Ok(PotentialDuplicatesSearchContext {
        search1: FileSearchContext {
            domain: domain_filter(db, &args.domains)?,
            predicates: Predicates {
                required_tags: args.tags.clone(),
                excluded_tags: args.excluded_tags.clone(),
            },
        },
        search2: FileSearchContext {
            domain: domain_filter(db, &args.domains2)?,
            predicates: Predicates {
                required_tags: args.tags2.clone(),
                excluded_tags: args.excluded_tags2.clone(),
            },
        },
        relation: match args.relation {
            RelationArg::Either => PairRelation::EitherMatches,
            RelationArg::Same => PairRelation::BothMatchSame,
            RelationArg::Different => PairRelation::BothMatchDifferent,
        },
        pixel_duplicates: match args.pixel {
            PixelArg::Required => PixelDuplicates::Required,
            PixelArg::Allowed => PixelDuplicates::Allowed,
            PixelArg::Excluded => PixelDuplicates::Excluded,
        },
        max_distance: args.max_distance,
    })
}

fn run_pairs(engine: &DupeEngine, command: PairsCommand) -> Result<()> {
    let db = engine.open_database()?;
    let finder = PotentialPairFinder::new(&db, engine.config().pair_block_size);

    match command {
        PairsCommand::Count(args) => {
            let context = build_context(&db, &args)?;
            let count = finder.count(&context, &WorkBudget::unlimited())?;
            println!("{} matching pairs", format!("{}", count.count).cyan());
        }
        PairsCommand::List {
            context,
            limit,
            by_media,
            by_size,
            descending,
        } => {
            let context = build_context(&db, &context)?;
            let sort = PairSort {
                key: if by_media {
                    PairSortKey::MediaId
                } else if by_size {
                    PairSortKey::Size
                } else {
                    PairSortKey::Distance
                },
                ascending: !descending,
            };
            let fetched = finder.fetch(&context, sort, Some(limit), &WorkBudget::unlimited())?;
            for pair in &fetched.pairs {
                print_pair(&db, pair)?;
            }
        }
        PairsCommand::Sample(args) => {
            let context = build_context(&db, &args)?;
            let sample = finder.random_sample(&context, &mut rand::thread_rng())?;
            if sample.is_empty() {
                println!("No matching pairs");
            }
            for pair in &sample {
                print_pair(&db, pair)?;
            }
        }
    }
    Ok(())
}

fn existing_media(db: &Database, id: i64) -> Result<MediaId> {
    let media_id = MediaId(id);
    if !db.media_exists(media_id)? {
        bail!("media {} does not exist", id);
    }
    Ok(media_id)
}

fn run_groups(engine: &DupeEngine, command: GroupsCommand) -> Result<()> {
    let db = engine.open_database()?;

    match command {
        GroupsCommand::Show { media } => {
            let media_id = existing_media(&db, media)?;
            let king = db.media_king(media_id)?;
            println!("{}", format!("Media {}", media_id).bold());
            for file_id in db.media_members(media_id)? {
                let marker = if Some(file_id) == king { "♛" } else { " " };
                println!("  {} {}", marker.yellow(), describe_file(&db, file_id)?);
            }
            if let Some(group) = db.alternates_group_for_media(media_id)? {
                let others: Vec<String> = db
                    .alternates_group_members(group)?
                    .into_iter()
                    .filter(|m| *m != media_id)
                    .map(|m| m.to_string())
                    .collect();
                println!("  alternates group {}: [{}]", group, others.join(", "));
            }
            for pair in db.potential_pairs_for_media(media_id)? {
                print_pair(&db, &pair)?;
            }
        }
        GroupsCommand::Merge { superior, mergee } => {
            let superior = existing_media(&db, superior)?;
            let mergee = existing_media(&db, mergee)?;
            db.merge_media(superior, mergee)?;
            println!("Merged media {} into {}", mergee, superior);
        }
        GroupsCommand::Alternates { a, b } => {
            let a = existing_media(&db, a)?;
            let b = existing_media(&db, b)?;
            if db.set_alternates(a, b)? {
                println!("Media {} and {} are alternates", a, b);
            } else {
                println!("{}", "Not recorded: the media are declared false positives".yellow());
            }
        }
        GroupsCommand::FalsePositive { a, b } => {
            let a = existing_media(&db, a)?;
            let b = existing_media(&db, b)?;
            if db.set_false_positive_media(a, b)? {
                println!("Media {} and {} are false positives", a, b);
            } else {
                println!("{}", "Not recorded: the media are alternates".yellow());
            }
        }
        GroupsCommand::Dissolve { media } => {
            let media_id = existing_media(&db, media)?;
            db.dissolve_media(media_id)?;
            println!("Dissolved media {}", media_id);
        }
        GroupsCommand::King { media, file } => {
            let media_id = existing_media(&db, media)?;
            let file_id = resolve_file(&db, &file)?;
            if !db.set_king(media_id, file_id)? {
                bail!("{} is not a member of media {}", file, media_id);
            }
            println!("{} is now king of media {}", describe_file(&db, file_id)?, media_id);
        }
    }
    Ok(())
}

fn comparator_for(db: &Database, choice: ComparatorArg) -> Result<Box<dyn PairComparator>> {
    let comparator: Box<dyn PairComparator> = match choice {
        ComparatorArg::LargerFile => {
            let sizes = db.file_sizes()?;
            Box::new(move |a: FileId, b: FileId| {
                let (size_a, size_b) = (sizes.get(&a)?, sizes.get(&b)?);
                (size_a > size_b).then_some(DuplicateAction::FirstIsBetter)
            })
        }
        ComparatorArg::SameQuality => {
            Box::new(|_: FileId, _: FileId| Some(DuplicateAction::SameQuality))
        }
        ComparatorArg::Alternates => {
            Box::new(|_: FileId, _: FileId| Some(DuplicateAction::Alternates))
        }
        ComparatorArg::FalsePositive => {
            Box::new(|_: FileId, _: FileId| Some(DuplicateAction::FalsePositive))
        }
    };
    Ok(comparator)
}

fn run_auto_resolve(engine: &DupeEngine, args: AutoResolveArgs) -> Result<()> {
    let db = engine.open_database()?;
    let context = build_context(&db, &args.context)?;
    let comparator = comparator_for(&db, args.comparator)?;

    let mut resolver = AutoResolutionEngine::new(&db, engine.config().auto_resolution_page_size);
    let rule = resolver.register(&args.name, context, comparator)?;
    if args.retry_failed {
        let requeued = db.reset_failed_tests(rule.id)?;
        info!("Requeued {} failed pairs", requeued);
    }

    let reporter = CliReporter::new();
    reporter.spinner(&format!("Running rule '{}'...", rule.name));
    let (search, action) =
        resolver.run_rule(&rule, &budget_for(engine.config(), args.seconds), &reporter)?;
    reporter.finish_bar();

    info!(
        "Searched {} pairs, {} matched",
        format!("{}", search.searched).cyan(),
        format!("{}", search.matched).cyan(),
    );
    info!(
        "{} actioned, {} left for review",
        format!("{}", action.actioned).green(),
        format!("{}", action.failed).yellow(),
    );
    if !search.outcome.is_finished() || !action.outcome.is_finished() {
        info!("{}", "Time budget spent, run again to continue".yellow());
    }
    Ok(())
}

fn run_rules(engine: &DupeEngine) -> Result<()> {
    let db = engine.open_database()?;
    let rules = db.list_rules()?;
    if rules.is_empty() {
        println!("No rules registered");
    }
    for rule in rules {
        let counts = db.rule_counts(rule.id)?;
        println!("{}", rule.name.bold());
        println!("  context: {}", rule.search_context);
        println!(
            "  not searched {}, no match {}, to test {}, failed {}, actioned {}",
            counts.not_searched,
            counts.does_not_match,
            counts.matches_not_tested,
            format!("{}", counts.failed_test).yellow(),
            format!("{}", counts.actioned).green(),
        );
    }
    Ok(())
}

fn run_stats(engine: &DupeEngine) -> Result<()> {
    let db = engine.open_database()?;
    let stats = db.index_stats(engine.config().search_distance)?;
    println!("{:<24}{}", "Files", stats.files);
    println!("{:<24}{}", "Perceptual hashes", stats.perceptual_hashes);
    println!("{:<24}{}", "Tree nodes", stats.tree_nodes);
    println!("{:<24}{}", "Queued rebalances", stats.queued_rebalances);
    println!("{:<24}{}", "Files awaiting search", stats.files_awaiting_search);
    println!("{:<24}{}", "Media", stats.media);
    println!("{:<24}{}", "Alternates groups", stats.alternates_groups);
    println!(
        "{:<24}{}",
        "Potential pairs",
        format!("{}", stats.potential_pairs).red()
    );
    Ok(())
}

fn run_truncate(engine: &DupeEngine) -> Result<()> {
    if !prompt_confirm(
        "Are you SURE you want to COMPLETELY DELETE the Database?",
        Some(false),
    )? {
        process::exit(0);
    }
    engine.open_database()?.truncate_all()?;
    println!("All tables truncated");
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
