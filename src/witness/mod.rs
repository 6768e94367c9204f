//! Witness oracles for exact redundancy pruning.
//!
//! A witness for a candidate vector is a belief at which the candidate's
//! value exceeds every reference vector's value by more than a tolerance.
//! A candidate without a witness adds nothing to the upper envelope.
//!
//! Two implementations share the contract:
//! - [`LpWitnessOracle`] solves the separating linear program exactly.
//! - [`SkylineWitnessOracle`] probes a fixed set of beliefs. It never
//!   reports a false witness but can miss real ones.

mod lp;
mod skyline;

use std::sync::Arc;

use crate::belief::BeliefState;
use crate::error::{AlphaResult, ValidationError};
use crate::vector::AlphaVector;

pub use lp::LpWitnessOracle;
pub use skyline::SkylineWitnessOracle;

/// Finds beliefs at which a candidate vector is strictly best.
pub trait WitnessOracle: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Returns a belief where `candidate` beats every vector in `others` by
    /// more than `tolerance`, or `None` if the oracle finds none.
    ///
    /// # Errors
    /// `EmptyReferenceSet` if `others` is empty; `DimensionMismatch` if the
    /// vectors disagree on the number of states.
    fn find_witness(
        &self,
        candidate: &AlphaVector,
        others: &[Arc<AlphaVector>],
        tolerance: f64,
    ) -> AlphaResult<Option<BeliefState>>;
}

pub(crate) fn check_call(candidate: &AlphaVector, others: &[Arc<AlphaVector>]) -> AlphaResult<()> {
    if others.is_empty() {
        return Err(ValidationError::EmptyReferenceSet.into());
    }
    if let Some(bad) = others.iter().find(|o| o.len() != candidate.len()) {
        return Err(ValidationError::DimensionMismatch {
            expected: candidate.len(),
            actual: bad.len(),
        }
        .into());
    }
    Ok(())
}

/// Candidate value minus the best reference value at `belief`.
#[must_use]
pub fn margin(candidate: &AlphaVector, others: &[Arc<AlphaVector>], belief: &BeliefState) -> f64 {
    let best_other = others
        .iter()
        .map(|o| o.dot_product(belief))
        .fold(f64::NEG_INFINITY, f64::max);
    candidate.dot_product(belief) - best_other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_call_rejects_malformed() {
        let c = AlphaVector::new(0, vec![1.0, 0.0]).unwrap();
        assert!(check_call(&c, &[]).is_err());
        let other = Arc::new(AlphaVector::new(1, vec![1.0]).unwrap());
        assert!(check_call(&c, &[other]).is_err());
    }

    #[test]
    fn test_margin() {
        let c = AlphaVector::new(0, vec![2.0, 0.0]).unwrap();
        let others = vec![Arc::new(AlphaVector::new(1, vec![1.0, 1.0]).unwrap())];
        let b = BeliefState::corner(2, 0).unwrap();
        assert!((margin(&c, &others, &b) - 1.0).abs() < 1e-12);
    }
}
