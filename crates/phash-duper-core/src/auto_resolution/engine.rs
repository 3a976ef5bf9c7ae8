use super::{AutoResolutionRule, DuplicateAction, PairComparator};
use crate::budget::{WorkBudget, WorkOutcome};
use crate::error::Error;
use crate::pairs::{PlanNode, PotentialDuplicatesSearchContext, PotentialPairFinder};
use crate::progress::ProgressReporter;
use crate::storage::models::*;
use crate::storage::Database;
use ahash::AHashSet;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchPhaseReport {
    pub searched: usize,
    pub matched: usize,
    pub outcome: WorkOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionPhaseReport {
    pub actioned: usize,
    pub failed: usize,
    pub outcome: WorkOutcome,
}

enum TestResult {
    Actioned,
    FailedTest,
}

pub struct AutoResolutionEngine<'db> {
    db: &'db Database,
    finder: PotentialPairFinder<'db>,
    page_size: usize,
    rng: StdRng,
}

impl<'db> AutoResolutionEngine<'db> {
    pub fn new(db: &'db Database, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        AutoResolutionEngine {
            db,
            finder: PotentialPairFinder::new(db, page_size),
            page_size,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the random source used for king selection.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Persist the rule under `name` and bind it to `comparator`.
    pub fn register(
        &self,
        name: &str,
        context: PotentialDuplicatesSearchContext,
        comparator: Box<dyn PairComparator>,
    ) -> Result<AutoResolutionRule, Error> {
        let id = self.db.register_rule(name, &context)?;
        Ok(AutoResolutionRule::new(id, name, context, comparator))
    }

    /// Classify unsearched pairs against the rule's search context, one page per transaction.
    pub fn run_search_phase(
        &self,
        rule: &AutoResolutionRule,
        budget: &WorkBudget,
        reporter: &dyn ProgressReporter,
    ) -> Result<SearchPhaseReport, Error> {
        let plan = PlanNode::compile(&rule.context);
        let mut report = SearchPhaseReport {
            searched: 0,
            matched: 0,
            outcome: WorkOutcome::Finished,
        };

        loop {
            if budget.should_stop() {
                report.outcome = WorkOutcome::Interrupted;
                break;
            }
            let page = self.db.unsearched_rule_pairs(rule.id, self.page_size)?;
            if page.is_empty() {
                break;
            }

            let matched = self.db.in_transaction(|| {
                let matched: AHashSet<(MediaId, MediaId)> = self
                    .finder
                    .run_plan(&plan, &page)?
                    .iter()
                    .map(|pair| pair.key())
                    .collect();
                for pair in &page {
                    let status = if matched.contains(&pair.key()) {
                        PairStatus::MatchesSearchButNotTested
                    } else {
                        PairStatus::DoesNotMatchSearch
                    };
                    self.db.set_rule_pair_status(rule.id, pair, status)?;
                }
                Ok::<_, Error>(matched.len())
            })?;

            report.searched += page.len();
            report.matched += matched;
            reporter.on_auto_resolution_progress(&rule.name, report.searched, 0);
            debug!(
                "Rule '{}' searched {} pairs, {} matched",
                rule.name,
                page.len(),
                matched
            );

            if page.len() < self.page_size {
                break;
            }
        }

        info!(
            "Rule '{}' search phase: {} searched, {} matched ({:?})",
            rule.name, report.searched, report.matched, report.outcome
        );
        Ok(report)
    }

    /// Test and apply matching pairs one at a time until none are left or the budget runs
    /// out. An actioned pair that is still queued afterwards is a fatal defect.
    pub fn run_action_phase(
        &mut self,
        rule: &AutoResolutionRule,
        budget: &WorkBudget,
        reporter: &dyn ProgressReporter,
    ) -> Result<ActionPhaseReport, Error> {
        let mut report = ActionPhaseReport {
            actioned: 0,
            failed: 0,
            outcome: WorkOutcome::Finished,
        };
        let mut last_actioned: Option<(MediaId, MediaId)> = None;

        loop {
            if budget.should_stop() {
                report.outcome = WorkOutcome::Interrupted;
                break;
            }
            let Some(pair) = self.db.next_untested_rule_pair(rule.id)? else {
                break;
            };
            if last_actioned == Some(pair.key()) {
                error!(
                    "Rule '{}' actioned pair ({}, {}) but it is still queued",
                    rule.name, pair.smaller, pair.larger
                );
                return Err(Error::PairNotRemoved {
                    rule: rule.name.clone(),
                    smaller: pair.smaller,
                    larger: pair.larger,
                });
            }

            let db = self.db;
            match db.in_transaction(|| self.test_and_apply(rule, &pair))? {
                TestResult::Actioned => {
                    report.actioned += 1;
                    last_actioned = Some(pair.key());
                }
                TestResult::FailedTest => {
                    report.failed += 1;
                    last_actioned = None;
                }
            }
            reporter.on_auto_resolution_progress(&rule.name, 0, report.actioned);
        }

        info!(
            "Rule '{}' action phase: {} actioned, {} failed ({:?})",
            rule.name, report.actioned, report.failed, report.outcome
        );
        Ok(report)
    }

    /// Search then act.
    pub fn run_rule(
        &mut self,
        rule: &AutoResolutionRule,
        budget: &WorkBudget,
        reporter: &dyn ProgressReporter,
    ) -> Result<(SearchPhaseReport, ActionPhaseReport), Error> {
        let search = self.run_search_phase(rule, budget, reporter)?;
        let action = self.run_action_phase(rule, budget, reporter)?;
        Ok((search, action))
    }

    fn test_and_apply(
        &mut self,
        rule: &AutoResolutionRule,
        pair: &PotentialPair,
    ) -> Result<TestResult, Error> {
        let domain = rule.context.king_domain();
        let smaller_king = self
            .db
            .get_best_king(pair.smaller, &domain, None, None, &mut self.rng)?;
        let larger_king = self
            .db
            .get_best_king(pair.larger, &domain, None, None, &mut self.rng)?;

        let decision = match (smaller_king, larger_king) {
            (Some(a), Some(b)) => rule.decide(a, b).map(|(action, swapped)| {
                if swapped {
                    (action, (b, pair.larger), (a, pair.smaller))
                } else {
                    (action, (a, pair.smaller), (b, pair.larger))
                }
            }),
            _ => None,
        };
        let Some((action, (first_file, first), (second_file, second))) = decision else {
            return self.fail_test(rule, pair);
        };

        match action {
            DuplicateAction::FirstIsBetter => {
                self.crown(first, first_file)?;
                self.db.merge_media(first, second)?;
            }
            DuplicateAction::SecondIsBetter => {
                self.crown(second, second_file)?;
                self.db.merge_media(second, first)?;
            }
            DuplicateAction::SameQuality => self.db.merge_media(first, second)?,
            DuplicateAction::Alternates => {
                self.db.set_alternates(first, second)?;
            }
            DuplicateAction::FalsePositive => {
                // Alternates of each other cannot be false positives; leave the pair for a human.
                if !self.db.set_false_positive_media(first, second)? {
                    return self.fail_test(rule, pair);
                }
            }
        }

        self.db.increment_rule_actioned(rule.id)?;
        debug!(
            "Rule '{}' applied {:?} to media {} and {}",
            rule.name, action, first, second
        );
        Ok(TestResult::Actioned)
    }

    fn crown(&self, media: MediaId, file_id: FileId) -> Result<(), Error> {
        if self.db.set_king(media, file_id)? {
            Ok(())
        } else {
            Err(Error::integrity(format!(
                "file {} chosen as king is not a member of media {}",
                file_id, media
            )))
        }
    }

    fn fail_test(
        &self,
        rule: &AutoResolutionRule,
        pair: &PotentialPair,
    ) -> Result<TestResult, Error> {
        self.db
            .set_rule_pair_status(rule.id, pair, PairStatus::MatchesSearchFailedTest)?;
        Ok(TestResult::FailedTest)
    }
}
