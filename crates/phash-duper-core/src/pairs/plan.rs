//! Query plans for narrowing potential pairs.
//!
//! A search context compiles into a small tree of nodes, evaluated bottom-up over one
//! fragment of the `potential_pairs` table at a time.

use super::context::{
    FileSearchContext, PairRelation, PixelDuplicates, PotentialDuplicatesSearchContext,
};
use crate::collaborators::{DomainFilter, FileDomain, SearchEngine};
use crate::error::Error;
use crate::storage::models::{FileId, MediaId, PotentialPair};
use crate::storage::Database;
use ahash::{AHashMap, AHashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchConstraint {
    EitherSide(FileSearchContext),
    BothSides(FileSearchContext),
    Crossed(FileSearchContext, FileSearchContext),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNode {
    BasePairs {
        max_distance: u32,
    },
    DomainFilter {
        input: Box<PlanNode>,
        domain: DomainFilter,
    },
    SearchConstraint {
        input: Box<PlanNode>,
        constraint: SearchConstraint,
    },
    PixelConstraint {
        input: Box<PlanNode>,
        pixel: PixelDuplicates,
    },
}

/// A pair that survived so far, with the king file of each side.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub pair: PotentialPair,
    pub smaller_king: FileId,
    pub larger_king: FileId,
}

fn kings_of(candidates: &[Candidate]) -> Vec<FileId> {
    let mut kings: Vec<FileId> = candidates
        .iter()
        .flat_map(|c| [c.smaller_king, c.larger_king])
        .collect();
    kings.sort();
    kings.dedup();
    kings
}

impl PlanNode {
    pub fn compile(context: &PotentialDuplicatesSearchContext) -> PlanNode {
        let mut plan = PlanNode::BasePairs {
            max_distance: context.max_distance,
        };

        let domain = context.king_domain();
        if domain != DomainFilter::All {
            plan = PlanNode::DomainFilter {
                input: Box::new(plan),
                domain,
            };
        }

        let constraint = match context.relation {
            PairRelation::EitherMatches => SearchConstraint::EitherSide(context.search1.clone()),
            PairRelation::BothMatchSame => SearchConstraint::BothSides(context.search1.clone()),
            PairRelation::BothMatchDifferent => {
                SearchConstraint::Crossed(context.search1.clone(), context.search2.clone())
            }
        };
        plan = PlanNode::SearchConstraint {
            input: Box::new(plan),
            constraint,
        };

        if context.pixel_duplicates != PixelDuplicates::Allowed {
            plan = PlanNode::PixelConstraint {
                input: Box::new(plan),
                pixel: context.pixel_duplicates,
            };
        }
        plan
    }

    /// The distance ceiling at the base of the plan.
    pub fn max_distance(&self) -> u32 {
        match self {
            PlanNode::BasePairs { max_distance } => *max_distance,
            PlanNode::DomainFilter { input, .. }
            | PlanNode::SearchConstraint { input, .. }
            | PlanNode::PixelConstraint { input, .. } => input.max_distance(),
        }
    }

    pub(crate) fn evaluate(
        &self,
        db: &Database,
        fragment: &[PotentialPair],
    ) -> Result<Vec<Candidate>, Error> {
        match self {
            PlanNode::BasePairs { max_distance } => {
                let mut kings: AHashMap<MediaId, FileId> = AHashMap::new();
                let mut king_of = |media: MediaId| -> Result<FileId, Error> {
                    if let Some(king) = kings.get(&media) {
                        return Ok(*king);
                    }
                    let king = db.media_king(media)?.ok_or_else(|| {
                        Error::integrity(format!("potential pair references missing media {}", media))
                    })?;
                    kings.insert(media, king);
                    Ok(king)
                };

                let mut out = Vec::with_capacity(fragment.len());
                for pair in fragment.iter().filter(|p| p.distance <= *max_distance) {
                    out.push(Candidate {
                        pair: *pair,
                        smaller_king: king_of(pair.smaller)?,
                        larger_king: king_of(pair.larger)?,
                    });
                }
                Ok(out)
            }
            PlanNode::DomainFilter { input, domain } => {
                let mut candidates = input.evaluate(db, fragment)?;
                let eligible = db.resolve_eligible_files(domain, &kings_of(&candidates))?;
                candidates.retain(|c| {
                    eligible.contains(&c.smaller_king) && eligible.contains(&c.larger_king)
                });
                Ok(candidates)
            }
            PlanNode::SearchConstraint { input, constraint } => {
                let mut candidates = input.evaluate(db, fragment)?;
                let kings = kings_of(&candidates);
                match constraint {
                    SearchConstraint::EitherSide(search) => {
                        let matched = side_matches(db, search, &kings)?;
                        candidates.retain(|c| {
                            matched.contains(&c.smaller_king) || matched.contains(&c.larger_king)
                        });
                    }
                    SearchConstraint::BothSides(search) => {
                        let matched = side_matches(db, search, &kings)?;
                        candidates.retain(|c| {
                            matched.contains(&c.smaller_king) && matched.contains(&c.larger_king)
                        });
                    }
                    SearchConstraint::Crossed(first, second) => {
                        let m1 = side_matches(db, first, &kings)?;
                        let m2 = side_matches(db, second, &kings)?;
                        candidates.retain(|c| {
                            (m1.contains(&c.smaller_king) && m2.contains(&c.larger_king))
                                || (m2.contains(&c.smaller_king) && m1.contains(&c.larger_king))
                        });
                    }
                }
                Ok(candidates)
            }
            PlanNode::PixelConstraint { input, pixel } => {
                let mut candidates = input.evaluate(db, fragment)?;
                let mut hashes: AHashMap<FileId, Option<Vec<u8>>> = AHashMap::new();
                for king in kings_of(&candidates) {
                    hashes.insert(king, db.pixel_hash(king)?);
                }
                let same_pixels = |c: &Candidate| match (
                    hashes.get(&c.smaller_king),
                    hashes.get(&c.larger_king),
                ) {
                    (Some(Some(a)), Some(Some(b))) => a == b,
                    _ => false,
                };
                match pixel {
                    PixelDuplicates::Required => candidates.retain(same_pixels),
                    PixelDuplicates::Excluded => candidates.retain(|c| !same_pixels(c)),
                    PixelDuplicates::Allowed => {}
                }
                Ok(candidates)
            }
        }
    }
}

/// Kings that are in the search's domain and satisfy its predicates.
fn side_matches(
    db: &Database,
    search: &FileSearchContext,
    kings: &[FileId],
) -> Result<AHashSet<FileId>, Error> {
    let in_domain = db.resolve_eligible_files(&search.domain, kings)?;
    Ok(db.execute(&search.predicates, Some(&in_domain))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Predicates;
    use crate::storage::models::DomainId;

    #[test]
    fn test_default_context_compiles_to_search_over_base() {
        let context = PotentialDuplicatesSearchContext::with_max_distance(3);
        let plan = PlanNode::compile(&context);
        assert_eq!(
            plan,
            PlanNode::SearchConstraint {
                input: Box::new(PlanNode::BasePairs { max_distance: 3 }),
                constraint: SearchConstraint::EitherSide(FileSearchContext::default()),
            }
        );
        assert_eq!(plan.max_distance(), 3);
    }

    #[test]
    fn test_full_context_compiles_every_layer() {
        let context = PotentialDuplicatesSearchContext {
            search1: FileSearchContext {
                domain: DomainFilter::Domains(vec![DomainId(1)]),
                predicates: Predicates {
                    required_tags: vec!["camera".into()],
                    excluded_tags: vec![],
                },
            },
            search2: FileSearchContext {
                domain: DomainFilter::Domains(vec![DomainId(2)]),
                predicates: Predicates::default(),
            },
            relation: PairRelation::BothMatchDifferent,
            pixel_duplicates: PixelDuplicates::Excluded,
            max_distance: 5,
        };
        let plan = PlanNode::compile(&context);

        let PlanNode::PixelConstraint { input, pixel } = plan else {
            panic!("expected pixel constraint at the top");
        };
        assert_eq!(pixel, PixelDuplicates::Excluded);
        let PlanNode::SearchConstraint { input, constraint } = *input else {
            panic!("expected search constraint");
        };
        assert!(matches!(constraint, SearchConstraint::Crossed(_, _)));
        let PlanNode::DomainFilter { input, domain } = *input else {
            panic!("expected domain filter");
        };
        assert_eq!(domain, DomainFilter::Domains(vec![DomainId(1), DomainId(2)]));
        assert_eq!(*input, PlanNode::BasePairs { max_distance: 5 });
    }
}
