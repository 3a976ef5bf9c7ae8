use crate::collaborators::{DomainFilter, Predicates};
use serde::{Deserialize, Serialize};

/// One side's search: files currently in `domain` that satisfy `predicates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileSearchContext {
    #[serde(default)]
    pub domain: DomainFilter,
    #[serde(default)]
    pub predicates: Predicates,
}

/// How the two sides of a pair must relate to the two searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PairRelation {
    /// At least one side matches search 1.
    #[default]
    EitherMatches,
    /// Both sides match search 1.
    BothMatchSame,
    /// One side matches search 1 and the other search 2, in either order.
    BothMatchDifferent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PixelDuplicates {
    Required,
    #[default]
    Allowed,
    Excluded,
}

/// Scope for potential-pair queries and auto-resolution rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotentialDuplicatesSearchContext {
    #[serde(default)]
    pub search1: FileSearchContext,
    #[serde(default)]
    pub search2: FileSearchContext,
    #[serde(default)]
    pub relation: PairRelation,
    #[serde(default)]
    pub pixel_duplicates: PixelDuplicates,
    pub max_distance: u32,
}

impl Default for PotentialDuplicatesSearchContext {
    fn default() -> Self {
        PotentialDuplicatesSearchContext {
            search1: FileSearchContext::default(),
            search2: FileSearchContext::default(),
            relation: PairRelation::default(),
            pixel_duplicates: PixelDuplicates::default(),
            max_distance: 8,
        }
    }
}

impl PotentialDuplicatesSearchContext {
    pub fn with_max_distance(max_distance: u32) -> Self {
        PotentialDuplicatesSearchContext {
            max_distance,
            ..Default::default()
        }
    }

    /// Domain every king must be in. The two searches' domains are unioned when the sides
    /// answer to different searches.
    pub fn king_domain(&self) -> DomainFilter {
        match self.relation {
            PairRelation::EitherMatches | PairRelation::BothMatchSame => self.search1.domain.clone(),
            PairRelation::BothMatchDifferent => self.search1.domain.union(&self.search2.domain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::DomainId;

    #[test]
    fn test_context_json_defaults() {
        let context: PotentialDuplicatesSearchContext =
            serde_json::from_str(r#"{"max_distance": 4}"#).unwrap();
        assert_eq!(context.max_distance, 4);
        assert_eq!(context.relation, PairRelation::EitherMatches);
        assert_eq!(context.pixel_duplicates, PixelDuplicates::Allowed);
        assert_eq!(context.search1.domain, DomainFilter::All);
    }

    #[test]
    fn test_king_domain_unions_for_different_searches() {
        let mut context = PotentialDuplicatesSearchContext::with_max_distance(2);
        context.search1.domain = DomainFilter::Domains(vec![DomainId(1)]);
        context.search2.domain = DomainFilter::Domains(vec![DomainId(2)]);
        assert_eq!(context.king_domain(), DomainFilter::Domains(vec![DomainId(1)]));

        context.relation = PairRelation::BothMatchDifferent;
        assert_eq!(
            context.king_domain(),
            DomainFilter::Domains(vec![DomainId(1), DomainId(2)])
        );
    }
}
