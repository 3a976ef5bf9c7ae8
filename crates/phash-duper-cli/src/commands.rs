use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "phash-duper")]
#[command(about = "Find and resolve near-duplicate images", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan the configured paths, hash every image and add it to the similarity index
    Ingest {
        /// Stop after this many seconds; images written so far are kept
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Rebalance the index and search new files for potential duplicates
    Maintain {
        /// Time budget in seconds (defaults to `maintenance_seconds`)
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// List indexed files within a distance of an image
    Search {
        /// Path to an image, or a content hash in hex
        file: String,
        /// Maximum Hamming distance (defaults to `search_distance`)
        #[arg(long)]
        distance: Option<u32>,
    },
    /// Query potential duplicate pairs
    Pairs {
        #[command(subcommand)]
        command: PairsCommand,
    },
    /// Inspect and edit duplicate groups
    Groups {
        #[command(subcommand)]
        command: GroupsCommand,
    },
    /// Run an auto-resolution rule over the potential pairs
    AutoResolve(AutoResolveArgs),
    /// Show auto-resolution rules and their progress
    Rules,
    /// Display index and duplicate store counts
    Stats,
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}

#[derive(Debug, Subcommand)]
pub enum PairsCommand {
    /// Count pairs matching the search
    Count(ContextArgs),
    /// List matching pairs, closest first
    List {
        #[command(flatten)]
        context: ContextArgs,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Sort by media id instead of distance
        #[arg(long, conflicts_with = "by_size")]
        by_media: bool,
        /// Sort by the combined size of the two kings
        #[arg(long)]
        by_size: bool,
        #[arg(long)]
        descending: bool,
    },
    /// Show the matching pairs of one randomly chosen media
    Sample(ContextArgs),
}

#[derive(Debug, Subcommand)]
pub enum GroupsCommand {
    /// Show a media's files, king and pairs
    Show { media: i64 },
    /// Fold the second media into the first
    Merge { superior: i64, mergee: i64 },
    /// Mark two media as alternates
    Alternates { a: i64, b: i64 },
    /// Declare two media unrelated
    FalsePositive { a: i64, b: i64 },
    /// Break a media apart into its files
    Dissolve { media: i64 },
    /// Make a member file the king of its media
    King {
        media: i64,
        /// Path to a member image, or its content hash in hex
        file: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RelationArg {
    Either,
    Same,
    Different,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PixelArg {
    Required,
    Allowed,
    Excluded,
}

/// Built-in decisions for `auto-resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ComparatorArg {
    /// Keep the larger file as king and merge
    LargerFile,
    /// Merge without changing the king
    SameQuality,
    Alternates,
    FalsePositive,
}

#[derive(Debug, Args)]
pub struct ContextArgs {
    /// Maximum Hamming distance between the two media
    #[arg(long, default_value_t = 8)]
    pub max_distance: u32,
    /// Tag the first search requires (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Tag the first search rejects (repeatable)
    #[arg(long = "exclude-tag")]
    pub excluded_tags: Vec<String>,
    /// Domain the first search is limited to (repeatable)
    #[arg(long = "domain")]
    pub domains: Vec<String>,
    #[arg(long, value_enum, default_value_t = RelationArg::Either)]
    pub relation: RelationArg,
    #[arg(long = "tag2")]
    pub tags2: Vec<String>,
    #[arg(long = "exclude-tag2")]
    pub excluded_tags2: Vec<String>,
    #[arg(long = "domain2")]
    pub domains2: Vec<String>,
    #[arg(long, value_enum, default_value_t = PixelArg::Allowed)]
    pub pixel: PixelArg,
}

#[derive(Debug, Args)]
pub struct AutoResolveArgs {
    /// Rule name; statuses are kept per name between runs
    pub name: String,
    #[arg(long, value_enum)]
    pub comparator: ComparatorArg,
    #[command(flatten)]
    pub context: ContextArgs,
    /// Time budget in seconds (defaults to `maintenance_seconds`)
    #[arg(long)]
    pub seconds: Option<u64>,
    /// Requeue pairs the rule failed to decide before running
    #[arg(long)]
    pub retry_failed: bool,
}
