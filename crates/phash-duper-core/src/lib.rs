pub mod auto_resolution;
pub mod budget;
pub mod collaborators;
pub mod config;
pub mod discovery;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod pairs;
pub mod phash;
pub mod progress;
pub mod scanner;
pub mod similarity;
pub mod storage;

pub use auto_resolution::{AutoResolutionEngine, AutoResolutionRule, DuplicateAction, PairComparator};
pub use budget::{WorkBudget, WorkOutcome};
pub use config::AppConfig;
pub use engine::{DupeEngine, IngestResult, MaintainResult};
pub use error::Error;
pub use pairs::{PotentialDuplicatesSearchContext, PotentialPairFinder};
pub use phash::PerceptualHash;
pub use progress::{ProgressReporter, SilentReporter};
pub use similarity::{IndexSettings, SimilarityIndex};
