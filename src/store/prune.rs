//! Pruning passes over a [`ValueFunctionStore`].
//!
//! Every pass holds the store's write lock for its whole duration, so it is
//! excluded from evaluation passes and other mutations, and it swaps the
//! vector set in one step.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AlphaResult, ValidationError};
use crate::executor::CancellationToken;
use crate::sampling::BeliefSampler;
use crate::vector::AlphaVector;
use crate::witness::WitnessOracle;

use super::ValueFunctionStore;

/// Outcome of a pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    /// Vectors before the pass.
    pub before: usize,
    /// Vectors after the pass.
    pub after: usize,
    /// Vectors kept only because they were too new to judge.
    pub exempted: usize,
    /// Calls made to the witness oracle.
    pub oracle_calls: usize,
    /// Passes over the set until nothing more was removed.
    pub passes: usize,
    /// Beliefs drawn by sampling prune.
    pub samples: usize,
    /// The pass stopped early on cancellation.
    pub cancelled: bool,
}

impl PruneReport {
    /// Vectors removed by the pass.
    #[must_use]
    pub const fn removed(&self) -> usize {
        self.before.saturating_sub(self.after)
    }
}

fn split_by_mask(
    vectors: &[Arc<AlphaVector>],
    keep: &[bool],
) -> (Vec<Arc<AlphaVector>>, Vec<Arc<AlphaVector>>) {
    let mut retained = Vec::with_capacity(vectors.len());
    let mut removed = Vec::new();
    for (v, &k) in vectors.iter().zip(keep) {
        if k {
            retained.push(Arc::clone(v));
        } else {
            removed.push(Arc::clone(v));
        }
    }
    (retained, removed)
}

impl ValueFunctionStore {
    /// Removes every vector pointwise-dominated by another. Among equal
    /// vectors the earliest inserted is kept. Idempotent.
    pub fn prune_pointwise_dominated(&self) -> AlphaResult<PruneReport> {
        let mut state = self.write("store.prune_pointwise_dominated")?;
        let before = state.vectors.len();

        let mut retained: Vec<Arc<AlphaVector>> = Vec::with_capacity(before);
        let mut removed: Vec<Arc<AlphaVector>> = Vec::new();
        for candidate in &state.vectors {
            if retained.iter().any(|kept| kept.dominates(candidate)) {
                removed.push(Arc::clone(candidate));
                continue;
            }
            retained.retain(|kept| {
                if candidate.dominates(kept) {
                    removed.push(Arc::clone(kept));
                    false
                } else {
                    true
                }
            });
            retained.push(Arc::clone(candidate));
        }

        state.replace(retained, &removed);
        let report = PruneReport {
            before,
            after: state.vectors.len(),
            passes: 1,
            ..PruneReport::default()
        };
        info!(store = %self.id, before, after = report.after, "pointwise-dominated vectors pruned");
        Ok(report)
    }

    /// Usage-based pruning: keeps a vector if it was inserted after
    /// `exempt_after` or was selected more than `min_hit_count` times.
    ///
    /// This is a heuristic. A vector that is optimal only on rarely visited
    /// beliefs can be dropped.
    pub fn prune_low_hit_count_vectors(
        &self,
        min_hit_count: u64,
        exempt_after: u64,
    ) -> AlphaResult<PruneReport> {
        let mut state = self.write("store.prune_low_hit_count_vectors")?;
        let before = state.vectors.len();

        let mut exempted = 0usize;
        let keep: Vec<bool> = state
            .vectors
            .iter()
            .map(|v| {
                let used = v.hit_count() > min_hit_count;
                let young = v.insertion_time() > exempt_after;
                if young && !used {
                    exempted += 1;
                }
                used || young
            })
            .collect();
        let (retained, removed) = split_by_mask(&state.vectors, &keep);
        state.replace(retained, &removed);

        let report = PruneReport {
            before,
            after: state.vectors.len(),
            exempted,
            passes: 1,
            ..PruneReport::default()
        };
        info!(
            store = %self.id,
            before,
            removed = report.removed(),
            exempted,
            "low hit-count vectors pruned"
        );
        Ok(report)
    }

    /// Exact redundancy elimination.
    ///
    /// Candidates are tested in insertion order against the vectors still in
    /// the set; one without a witness is removed at once, before the next
    /// candidate is tested. Vectors pointwise-dominated by another are
    /// removed without consulting the oracle. Passes repeat until one
    /// removes nothing.
    ///
    /// On an oracle error the store is left unchanged.
    pub fn prune_exact_witness(&self, oracle: &dyn WitnessOracle) -> AlphaResult<PruneReport> {
        self.prune_exact_witness_cancellable(oracle, &CancellationToken::new())
    }

    /// [`Self::prune_exact_witness`] that checks `token` before each
    /// candidate. Removals decided before cancellation are kept.
    pub fn prune_exact_witness_cancellable(
        &self,
        oracle: &dyn WitnessOracle,
        token: &CancellationToken,
    ) -> AlphaResult<PruneReport> {
        let mut state = self.write("store.prune_exact_witness")?;
        let before = state.vectors.len();
        let tolerance = self.config.tolerance;

        let mut live: Vec<Arc<AlphaVector>> = state.vectors.clone();
        let mut removed: Vec<Arc<AlphaVector>> = Vec::new();
        let mut oracle_calls = 0usize;
        let mut passes = 0usize;
        let mut cancelled = false;

        'passes: loop {
            passes += 1;
            let mut removed_in_pass = false;
            let mut idx = 0;
            while idx < live.len() && live.len() > 1 {
                if token.is_cancelled() {
                    cancelled = true;
                    break 'passes;
                }
                let others: Vec<Arc<AlphaVector>> = live
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != idx)
                    .map(|(_, v)| Arc::clone(v))
                    .collect();
                let candidate = &live[idx];
                let redundant = if others.iter().any(|o| o.dominates(candidate)) {
                    true
                } else {
                    oracle_calls += 1;
                    oracle.find_witness(candidate, &others, tolerance)?.is_none()
                };
                if redundant {
                    removed.push(live.remove(idx));
                    removed_in_pass = true;
                } else {
                    idx += 1;
                }
            }
            if !removed_in_pass {
                break;
            }
        }

        state.replace(live, &removed);
        let report = PruneReport {
            before,
            after: state.vectors.len(),
            oracle_calls,
            passes,
            cancelled,
            ..PruneReport::default()
        };
        info!(
            store = %self.id,
            oracle = oracle.name(),
            before,
            after = report.after,
            oracle_calls,
            passes,
            cancelled,
            "witness pruning finished"
        );
        Ok(report)
    }

    /// Approximate pruning by sampling beliefs.
    ///
    /// For each drawn belief, the best vector among those not yet retained
    /// is retained unless an already retained vector comes within tolerance
    /// of its value there. Stops after `sample_count` draws or once every
    /// vector is retained. Vectors never selected are dropped.
    pub fn prune_random_sampling(
        &self,
        sample_count: usize,
        sampler: &mut dyn BeliefSampler,
    ) -> AlphaResult<PruneReport> {
        if sample_count == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "sample_count must be at least 1".to_string(),
            }
            .into());
        }
        let mut state = self.write("store.prune_random_sampling")?;
        let before = state.vectors.len();
        let tolerance = self.config.tolerance;

        let mut candidates: Vec<usize> = (0..before).collect();
        let mut keep = vec![false; before];
        let mut retained: Vec<usize> = Vec::new();
        let mut samples = 0usize;

        while samples < sample_count && !candidates.is_empty() {
            let belief = sampler.sample(self.state_count)?;
            samples += 1;

            let mut best_pos = 0usize;
            let mut best_value = f64::NEG_INFINITY;
            for (pos, &idx) in candidates.iter().enumerate() {
                let value = state.vectors[idx].dot_product(&belief);
                if value > best_value {
                    best_pos = pos;
                    best_value = value;
                }
            }
            let covered = retained
                .iter()
                .any(|&idx| state.vectors[idx].dot_product(&belief) + tolerance >= best_value);
            if !covered {
                let idx = candidates.remove(best_pos);
                keep[idx] = true;
                retained.push(idx);
            }
        }

        let (kept, removed) = split_by_mask(&state.vectors, &keep);
        state.replace(kept, &removed);
        let report = PruneReport {
            before,
            after: state.vectors.len(),
            passes: 1,
            samples,
            ..PruneReport::default()
        };
        info!(
            store = %self.id,
            before,
            after = report.after,
            samples,
            "sampling prune finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::belief::BeliefState;
    use crate::executor::CancellationToken;
    use crate::sampling::UniformSimplexSampler;
    use crate::store::{StoreConfig, ValueFunctionStore};
    use crate::vector::AlphaVector;
    use crate::witness::LpWitnessOracle;

    fn alpha(action: usize, c: &[f64]) -> AlphaVector {
        AlphaVector::new(action, c.to_vec()).unwrap()
    }

    fn store_with(vectors: &[&[f64]]) -> ValueFunctionStore {
        let s = ValueFunctionStore::new(vectors[0].len(), StoreConfig::default()).unwrap();
        for (a, c) in vectors.iter().enumerate() {
            s.add(alpha(a, c), false).unwrap();
        }
        s
    }

    fn actions(s: &ValueFunctionStore) -> Vec<usize> {
        s.vectors().unwrap().iter().map(|v| v.action()).collect()
    }

    #[test]
    fn test_pointwise_keeps_first_of_equal_vectors() {
        let s = store_with(&[&[1.0, 1.0], &[1.0, 1.0], &[0.0, 0.5], &[2.0, 0.0]]);
        let report = s.prune_pointwise_dominated().unwrap();
        assert_eq!(actions(&s), vec![0, 3]);
        assert_eq!(report.removed(), 2);
    }

    #[test]
    fn test_pointwise_later_dominator_evicts_earlier() {
        let s = store_with(&[&[0.0, 0.0], &[1.0, 0.0], &[2.0, 2.0]]);
        s.prune_pointwise_dominated().unwrap();
        assert_eq!(actions(&s), vec![2]);
        assert!(s.vectors().unwrap()[0].insertion_time() > 0);
    }

    #[test]
    fn test_no_removal_leaves_counter_unchanged() {
        let s = store_with(&[&[2.0, 0.0], &[0.0, 2.0]]);
        let counter = s.change_counter().unwrap();
        s.prune_pointwise_dominated().unwrap();
        assert_eq!(s.change_counter().unwrap(), counter);
    }

    #[test]
    fn test_low_hit_count_exempts_young_vectors() {
        let s = store_with(&[&[3.0, 0.0], &[0.0, 3.0], &[1.0, 1.0]]);
        let b = BeliefState::from_dense(&[1.0, 0.0]).unwrap();
        s.get_max_alpha(&b).unwrap();
        // Vector 0 has a hit; vector 2 (insertion time 3) is exempt.
        let report = s.prune_low_hit_count_vectors(0, 2).unwrap();
        assert_eq!(actions(&s), vec![0, 2]);
        assert_eq!(report.exempted, 1);
        assert_eq!(report.removed(), 1);
    }

    #[test]
    fn test_exact_witness_removes_envelope_interior() {
        // [1, 1] never strictly beats max([3, 0], [0, 3]) on the simplex.
        let s = store_with(&[&[3.0, 0.0], &[1.0, 1.0], &[0.0, 3.0]]);
        let report = s.prune_exact_witness(&LpWitnessOracle::default()).unwrap();
        assert_eq!(actions(&s), vec![0, 2]);
        assert!(report.oracle_calls >= 3);
        assert_eq!(report.passes, 2);
    }

    #[test]
    fn test_exact_witness_single_vector_untouched() {
        let s = store_with(&[&[1.0, 1.0]]);
        let report = s.prune_exact_witness(&LpWitnessOracle::default()).unwrap();
        assert_eq!(report.after, 1);
        assert_eq!(report.oracle_calls, 0);
    }

    #[test]
    fn test_exact_witness_stops_when_cancelled() {
        let s = store_with(&[&[3.0, 0.0], &[1.0, 1.0], &[0.0, 3.0]]);
        let token = CancellationToken::new();
        token.cancel();
        let report = s
            .prune_exact_witness_cancellable(&LpWitnessOracle::default(), &token)
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.oracle_calls, 0);
        assert_eq!(s.len().unwrap(), 3);
    }

    #[test]
    fn test_random_sampling_keeps_corner_maximisers() {
        let s = store_with(&[&[3.0, 0.0], &[1.0, 1.0], &[0.0, 3.0]]);
        let mut sampler = UniformSimplexSampler::seeded(11);
        let report = s.prune_random_sampling(50, &mut sampler).unwrap();
        assert_eq!(actions(&s), vec![0, 2]);
        assert_eq!(report.samples, 50);
    }

    #[test]
    fn test_random_sampling_rejects_zero_samples() {
        let s = store_with(&[&[1.0, 1.0]]);
        let mut sampler = UniformSimplexSampler::seeded(1);
        assert!(s.prune_random_sampling(0, &mut sampler).is_err());
        assert_eq!(s.len().unwrap(), 1);
    }
}
