//! Two-stage recommender: similarity filter then contextual bandit
//!
//! Stage one narrows the candidate pool by semantic skill similarity
//! (`similarity`). Stage two extracts a context vector per surviving
//! candidate (`features`) and lets a disjoint LinUCB bandit pick the arm
//! (`bandit`, with its Cholesky kernel in `linalg`).

pub mod bandit;
pub mod features;
pub mod linalg;
pub mod similarity;

pub use bandit::{ArmChoice, ArmState, LinUcbBandit};
pub use features::FeatureExtractor;
pub use similarity::{RankedCandidate, SkillSimilarityFilter};

use crate::types::Employee;
use std::cmp::Ordering;

/// Score difference below which two candidates are considered tied
pub(crate) const SCORE_TOLERANCE: f64 = 1e-9;

/// Deterministic candidate ordering used by both stages when scores tie:
/// higher productivity first, then lower workload, then lexicographic id.
pub(crate) fn tie_break(a: &Employee, b: &Employee) -> Ordering {
    b.productivity_score
        .total_cmp(&a.productivity_score)
        .then_with(|| a.workload.cmp(&b.workload))
        .then_with(|| a.id.cmp(&b.id))
}

/// Order candidates by score descending, treating scores within
/// `SCORE_TOLERANCE` as ties resolved by [`tie_break`]. Selection and the
/// recommendation preview both rank with this comparator, so the preview's
/// top pick is the arm the bandit would choose.
pub(crate) fn rank_by_score(score_a: f64, a: &Employee, score_b: f64, b: &Employee) -> Ordering {
    if (score_a - score_b).abs() <= SCORE_TOLERANCE {
        tie_break(a, b)
    } else {
        score_b.total_cmp(&score_a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Skill;
    use chrono::Utc;

    #[test]
    fn test_tie_break_chain() {
        let now = Utc::now();
        let mut a = Employee::new("a", vec![Skill::named("rust")], now);
        let mut b = Employee::new("b", vec![Skill::named("rust")], now);

        a.productivity_score = 0.9;
        b.productivity_score = 0.5;
        assert_eq!(tie_break(&a, &b), Ordering::Less);

        b.productivity_score = 0.9;
        a.workload = 3;
        b.workload = 1;
        assert_eq!(tie_break(&a, &b), Ordering::Greater);

        a.workload = 1;
        let expected = a.id.cmp(&b.id);
        assert_eq!(tie_break(&a, &b), expected);
    }

    #[test]
    fn test_rank_by_score() {
        let now = Utc::now();
        let mut a = Employee::new("a", vec![Skill::named("rust")], now);
        let mut b = Employee::new("b", vec![Skill::named("rust")], now);
        a.productivity_score = 0.2;
        b.productivity_score = 0.9;

        // Clear score gap wins regardless of tie-break attributes
        assert_eq!(rank_by_score(1.0, &a, 0.5, &b), Ordering::Less);
        assert_eq!(rank_by_score(0.5, &a, 1.0, &b), Ordering::Greater);

        // Near-equal scores fall through to the tie-break chain
        assert_eq!(rank_by_score(1.0, &a, 1.0 + 1e-12, &b), Ordering::Greater);
    }
}
