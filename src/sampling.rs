//! Belief samplers for sampling-based pruning and witness search.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::belief::BeliefState;
use crate::error::AlphaResult;

/// Source of belief points.
pub trait BeliefSampler: Send {
    /// Draws the next belief over `state_count` states.
    fn sample(&mut self, state_count: usize) -> AlphaResult<BeliefState>;
}

/// Draws uniformly from the probability simplex, optionally yielding every
/// corner belief first.
#[derive(Debug, Clone)]
pub struct UniformSimplexSampler {
    rng: StdRng,
    corners_first: bool,
    next_corner: usize,
}

impl UniformSimplexSampler {
    /// Seeded sampler that visits the corners first.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            corners_first: true,
            next_corner: 0,
        }
    }

    /// Seeded sampler that only draws interior points.
    #[must_use]
    pub fn interior_only(seed: u64) -> Self {
        Self {
            corners_first: false,
            ..Self::seeded(seed)
        }
    }
}

impl BeliefSampler for UniformSimplexSampler {
    fn sample(&mut self, state_count: usize) -> AlphaResult<BeliefState> {
        if self.corners_first && self.next_corner < state_count {
            let corner = self.next_corner;
            self.next_corner += 1;
            return BeliefState::corner(state_count, corner);
        }
        uniform_simplex_point(&mut self.rng, state_count)
    }
}

/// Uniform draw from the simplex: normalised exponential variates.
pub fn uniform_simplex_point<R: Rng + ?Sized>(
    rng: &mut R,
    state_count: usize,
) -> AlphaResult<BeliefState> {
    let weights: Vec<f64> = (0..state_count)
        .map(|_| -rng.gen_range(f64::EPSILON..1.0).ln())
        .collect();
    BeliefState::from_dense(&weights)
}
