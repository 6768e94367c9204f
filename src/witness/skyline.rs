//! Heuristic witness search by probing.
//!
//! Probes the simplex corners, the centroid, and a seeded batch of uniform
//! interior points. Any belief it returns is a genuine witness; it can miss
//! witnesses that lie in narrow regions between probes.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::belief::BeliefState;
use crate::error::AlphaResult;
use crate::sampling::uniform_simplex_point;
use crate::vector::AlphaVector;

use super::{check_call, margin, WitnessOracle};

/// Approximate oracle for use when no LP backend is wanted.
#[derive(Debug, Clone, Copy)]
pub struct SkylineWitnessOracle {
    /// Interior probes per call.
    pub random_probes: usize,
    /// Seed for the interior probes; each call uses the same sequence.
    pub seed: u64,
}

impl Default for SkylineWitnessOracle {
    fn default() -> Self {
        Self {
            random_probes: 256,
            seed: 0x5eed,
        }
    }
}

impl WitnessOracle for SkylineWitnessOracle {
    fn name(&self) -> &'static str {
        "skyline"
    }

    fn find_witness(
        &self,
        candidate: &AlphaVector,
        others: &[Arc<AlphaVector>],
        tolerance: f64,
    ) -> AlphaResult<Option<BeliefState>> {
        check_call(candidate, others)?;
        let n = candidate.len();

        let mut best: Option<(f64, BeliefState)> = None;
        let mut consider = |belief: BeliefState| {
            let m = margin(candidate, others, &belief);
            if m > tolerance && best.as_ref().map_or(true, |(bm, _)| m > *bm) {
                best = Some((m, belief));
            }
        };

        for s in 0..n {
            consider(BeliefState::corner(n, s)?);
        }
        consider(BeliefState::uniform(n)?);
        let mut rng = StdRng::seed_from_u64(self.seed);
        for _ in 0..self.random_probes {
            consider(uniform_simplex_point(&mut rng, n)?);
        }

        Ok(best.map(|(_, belief)| belief))
    }
}
