//! Rule-driven resolution of potential pairs.
//!
//! A rule first classifies every potential pair against its search context (the search
//! phase), then runs its comparator over the matching pairs and applies the decision (the
//! action phase). Both phases are chunked and resumable.

mod engine;
mod rules;

pub use engine::{ActionPhaseReport, AutoResolutionEngine, SearchPhaseReport};

use crate::pairs::PotentialDuplicatesSearchContext;
use crate::storage::models::{FileId, RuleId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The duplicate-status decision for an ordered pair of files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicateAction {
    /// Same picture; the first file is the better copy and becomes king.
    FirstIsBetter,
    /// Same picture; the second file is the better copy and becomes king.
    SecondIsBetter,
    /// Same picture, no preferred copy. The first side's king stays.
    SameQuality,
    Alternates,
    FalsePositive,
}

/// Decides what to do with a pair of king files. `None` means the rule cannot tell.
pub trait PairComparator {
    fn test_pair(&self, first: FileId, second: FileId) -> Option<DuplicateAction>;
}

impl<F> PairComparator for F
where
    F: Fn(FileId, FileId) -> Option<DuplicateAction>,
{
    fn test_pair(&self, first: FileId, second: FileId) -> Option<DuplicateAction> {
        self(first, second)
    }
}

pub struct AutoResolutionRule {
    pub id: RuleId,
    pub name: String,
    pub context: PotentialDuplicatesSearchContext,
    comparator: Box<dyn PairComparator>,
}

impl AutoResolutionRule {
    pub fn new(
        id: RuleId,
        name: impl Into<String>,
        context: PotentialDuplicatesSearchContext,
        comparator: Box<dyn PairComparator>,
    ) -> Self {
        AutoResolutionRule {
            id,
            name: name.into(),
            context,
            comparator,
        }
    }

    /// Try the pair as given, then swapped. The returned flag is true when the decision
    /// came from the swapped order.
    pub fn decide(&self, a: FileId, b: FileId) -> Option<(DuplicateAction, bool)> {
        if let Some(action) = self.comparator.test_pair(a, b) {
            return Some((action, false));
        }
        self.comparator.test_pair(b, a).map(|action| (action, true))
    }
}

impl fmt::Debug for AutoResolutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoResolutionRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_tries_swapped_order() {
        // only answers when the smaller id comes second
        let rule = AutoResolutionRule::new(
            RuleId(1),
            "larger first",
            PotentialDuplicatesSearchContext::default(),
            Box::new(|a: FileId, b: FileId| (a > b).then_some(DuplicateAction::FirstIsBetter)),
        );
        assert_eq!(
            rule.decide(FileId(9), FileId(2)),
            Some((DuplicateAction::FirstIsBetter, false))
        );
        assert_eq!(
            rule.decide(FileId(2), FileId(9)),
            Some((DuplicateAction::FirstIsBetter, true))
        );
    }

    #[test]
    fn test_decide_none_when_comparator_abstains() {
        let rule = AutoResolutionRule::new(
            RuleId(1),
            "never",
            PotentialDuplicatesSearchContext::default(),
            Box::new(|_: FileId, _: FileId| None),
        );
        assert_eq!(rule.decide(FileId(1), FileId(2)), None);
    }
}
