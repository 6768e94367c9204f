//! Planners that improve a value function in place.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::belief::BeliefState;
use crate::error::{AlphaResult, ValidationError};
use crate::executor::CancellationToken;
use crate::pomdp::Pomdp;
use crate::store::ValueFunctionStore;
use crate::vector::AlphaVector;

/// One improvement step over a store.
pub trait Planner: Send {
    /// Short name for logs and reports.
    fn name(&self) -> &str;

    /// Runs one iteration and returns the largest value change it caused at
    /// the beliefs it touched. Stops early, returning what it has, when
    /// `token` is cancelled.
    fn iterate(
        &mut self,
        store: &ValueFunctionStore,
        token: &CancellationToken,
    ) -> AlphaResult<f64>;
}

type SuccessorKey = (usize, usize, usize);

/// Point-based value backup over a fixed set of beliefs.
///
/// Each backup builds the best one-step lookahead vector at a belief and
/// inserts it with that belief as its witness, so the store's cache for the
/// belief is refreshed as part of the insert.
pub struct PointBasedBackup {
    model: Arc<dyn Pomdp>,
    beliefs: Vec<Arc<BeliefState>>,
    successors: HashMap<SuccessorKey, Option<Arc<BeliefState>>>,
}

impl PointBasedBackup {
    /// Creates a planner over `beliefs`.
    pub fn new(model: Arc<dyn Pomdp>, beliefs: Vec<BeliefState>) -> AlphaResult<Self> {
        if beliefs.is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "point-based backup needs at least one belief".to_string(),
            }
            .into());
        }
        let n = model.state_count();
        if let Some(bad) = beliefs.iter().find(|b| b.state_count() != n) {
            return Err(ValidationError::DimensionMismatch {
                expected: n,
                actual: bad.state_count(),
            }
            .into());
        }
        Ok(Self {
            model,
            beliefs: beliefs.into_iter().map(Arc::new).collect(),
            successors: HashMap::new(),
        })
    }

    /// Beliefs backed up by each iteration.
    #[must_use]
    pub fn beliefs(&self) -> &[Arc<BeliefState>] {
        &self.beliefs
    }

    /// Constant vector no policy can fall below.
    fn lower_bound(&self) -> AlphaResult<AlphaVector> {
        let model = &self.model;
        let mut worst = f64::INFINITY;
        for s in 0..model.state_count() {
            for a in 0..model.action_count() {
                worst = worst.min(model.reward(s, a));
            }
        }
        AlphaVector::constant(0, model.state_count(), worst / (1.0 - model.discount()))
    }

    fn successor(
        &mut self,
        belief: usize,
        action: usize,
        observation: usize,
    ) -> AlphaResult<Option<Arc<BeliefState>>> {
        let key = (belief, action, observation);
        if let Some(cached) = self.successors.get(&key) {
            return Ok(cached.clone());
        }
        let next = self
            .model
            .next_belief(&self.beliefs[belief], action, observation)?
            .map(Arc::new);
        self.successors.insert(key, next.clone());
        Ok(next)
    }

    /// Best backed-up vector at belief `index`.
    fn backup(&mut self, index: usize, store: &ValueFunctionStore) -> AlphaResult<AlphaVector> {
        let n = self.model.state_count();
        let gamma = self.model.discount();
        let belief = Arc::clone(&self.beliefs[index]);
        // Impossible observations still need some vector; any one keeps the
        // backup a valid lower bound.
        let fallback = store.get_max_alpha(&belief)?;

        let mut best: Option<(f64, AlphaVector)> = None;
        for a in 0..self.model.action_count() {
            let mut coefficients: Vec<f64> = (0..n).map(|s| self.model.reward(s, a)).collect();
            for o in 0..self.model.observation_count() {
                let alpha = match self.successor(index, a, o)? {
                    Some(next) => store.get_max_alpha(&next)?,
                    None => fallback.clone(),
                };
                let Some(alpha) = alpha else { continue };
                for (s, c) in coefficients.iter_mut().enumerate() {
                    let mut g = 0.0;
                    for next in 0..n {
                        let t = self.model.transition(s, a, next);
                        if t > 0.0 {
                            g += t
                                * self.model.observation(a, next, o)
                                * alpha.coefficients()[next];
                        }
                    }
                    *c += gamma * g;
                }
            }
            let candidate = AlphaVector::new(a, coefficients)?;
            let value = candidate.dot_product(&belief);
            if best.as_ref().map_or(true, |(v, _)| value > *v) {
                best = Some((value, candidate));
            }
        }
        best.map(|(_, v)| v).ok_or_else(|| {
            ValidationError::InvalidModel {
                reason: "model has no actions".to_string(),
            }
            .into()
        })
    }
}

impl Planner for PointBasedBackup {
    fn name(&self) -> &str {
        "point_based_backup"
    }

    fn iterate(
        &mut self,
        store: &ValueFunctionStore,
        token: &CancellationToken,
    ) -> AlphaResult<f64> {
        if store.state_count() != self.model.state_count() {
            return Err(ValidationError::DimensionMismatch {
                expected: self.model.state_count(),
                actual: store.state_count(),
            }
            .into());
        }
        if store.is_empty()? {
            store.add(self.lower_bound()?, false)?;
            debug!(store = %store.id(), "seeded empty store with lower bound");
        }

        let mut residual = 0.0f64;
        for index in 0..self.beliefs.len() {
            if token.is_cancelled() {
                break;
            }
            let belief = Arc::clone(&self.beliefs[index]);
            let before = store.value_at(&belief)?;
            let vector = self.backup(index, store)?.with_witness(&belief);
            let inserted = store.add_prune_pointwise_dominated(vector)?;
            let after = store.value_at(&belief)?;
            trace!(belief = index, before, after, inserted, "backup");
            residual = residual.max((after - before).abs());
        }
        Ok(residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pomdp::TabularPomdp;
    use crate::store::StoreConfig;

    fn tiger_planner() -> PointBasedBackup {
        let model: Arc<dyn Pomdp> = Arc::new(TabularPomdp::tiger(0.9).unwrap());
        let beliefs = [0.5, 0.15, 0.85, 0.03, 0.97]
            .iter()
            .map(|&p| BeliefState::from_dense(&[p, 1.0 - p]).unwrap())
            .collect();
        PointBasedBackup::new(model, beliefs).unwrap()
    }

    #[test]
    fn test_seeds_lower_bound_and_improves() {
        let store = ValueFunctionStore::new(2, StoreConfig::default()).unwrap();
        let mut planner = tiger_planner();
        let token = CancellationToken::new();
        let centre = BeliefState::uniform(2).unwrap();

        planner.iterate(&store, &token).unwrap();
        let first = store.value_at(&centre).unwrap();
        assert!(first > -1000.0);
        for _ in 0..20 {
            planner.iterate(&store, &token).unwrap();
        }
        let later = store.value_at(&centre).unwrap();
        assert!(later >= first - 1e-9);
    }

    #[test]
    fn test_confident_beliefs_open_a_door() {
        let store = ValueFunctionStore::new(2, StoreConfig::default()).unwrap();
        let mut planner = tiger_planner();
        let token = CancellationToken::new();
        for _ in 0..60 {
            planner.iterate(&store, &token).unwrap();
        }
        let sure_left = BeliefState::from_dense(&[0.97, 0.03]).unwrap();
        let unsure = BeliefState::uniform(2).unwrap();
        // Tiger on the left: open the right door.
        assert_eq!(store.best_action(&sure_left).unwrap(), Some(2));
        assert_eq!(store.best_action(&unsure).unwrap(), Some(0));
    }

    #[test]
    fn test_cancelled_iteration_only_seeds() {
        let store = ValueFunctionStore::new(2, StoreConfig::default()).unwrap();
        let mut planner = tiger_planner();
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(planner.iterate(&store, &token).unwrap(), 0.0);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_rejects_mismatched_beliefs() {
        let model: Arc<dyn Pomdp> = Arc::new(TabularPomdp::tiger(0.9).unwrap());
        assert!(PointBasedBackup::new(Arc::clone(&model), Vec::new()).is_err());
        let wrong = vec![BeliefState::uniform(3).unwrap()];
        assert!(PointBasedBackup::new(model, wrong).is_err());
    }
}
