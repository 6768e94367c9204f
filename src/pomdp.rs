//! POMDP model contract and a dense tabular implementation.

use rand::{Rng, RngCore};

use crate::belief::BeliefState;
use crate::error::{AlphaResult, ValidationError};

const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// A discrete POMDP model.
///
/// Sampling methods take `&mut dyn RngCore` so the trait stays object safe
/// and models can be shared as `Arc<dyn Pomdp>`.
pub trait Pomdp: Send + Sync {
    /// Number of hidden states.
    fn state_count(&self) -> usize;

    /// Number of actions.
    fn action_count(&self) -> usize;

    /// Number of observations.
    fn observation_count(&self) -> usize;

    /// Discount factor in `[0, 1)`.
    fn discount(&self) -> f64;

    /// Immediate reward for taking `action` in `state`.
    fn reward(&self, state: usize, action: usize) -> f64;

    /// `P(next | state, action)`.
    fn transition(&self, state: usize, action: usize, next: usize) -> f64;

    /// `P(observation | action, next)`.
    fn observation(&self, action: usize, next: usize, observation: usize) -> f64;

    /// Belief the model starts in.
    fn initial_belief(&self) -> AlphaResult<BeliefState> {
        BeliefState::uniform(self.state_count())
    }

    /// Expected immediate reward under `belief`.
    fn expected_reward(&self, belief: &BeliefState, action: usize) -> f64 {
        belief.nonzero().map(|(s, p)| p * self.reward(s, action)).sum()
    }

    /// Unnormalised successor mass `P(next, observation | belief, action)`.
    fn successor_mass(&self, belief: &BeliefState, action: usize, observation: usize) -> Vec<f64> {
        let n = self.state_count();
        let mut mass = vec![0.0; n];
        for (s, p) in belief.nonzero() {
            for (next, m) in mass.iter_mut().enumerate() {
                let t = self.transition(s, action, next);
                if t > 0.0 {
                    *m += p * t;
                }
            }
        }
        for (next, m) in mass.iter_mut().enumerate() {
            *m *= self.observation(action, next, observation);
        }
        mass
    }

    /// `P(observation | belief, action)`.
    fn observation_probability(
        &self,
        belief: &BeliefState,
        action: usize,
        observation: usize,
    ) -> f64 {
        self.successor_mass(belief, action, observation).iter().sum()
    }

    /// Bayesian belief update, or `None` if `observation` is impossible.
    fn next_belief(
        &self,
        belief: &BeliefState,
        action: usize,
        observation: usize,
    ) -> AlphaResult<Option<BeliefState>> {
        let mass = self.successor_mass(belief, action, observation);
        if mass.iter().sum::<f64>() <= 0.0 {
            return Ok(None);
        }
        BeliefState::from_dense(&mass).map(Some)
    }

    /// Draws a successor state.
    fn sample_next_state(&self, state: usize, action: usize, rng: &mut dyn RngCore) -> usize {
        let n = self.state_count();
        sample_index(rng, n, |next| self.transition(state, action, next))
    }

    /// Draws an observation.
    fn sample_observation(&self, action: usize, next: usize, rng: &mut dyn RngCore) -> usize {
        let k = self.observation_count();
        sample_index(rng, k, |o| self.observation(action, next, o))
    }
}

fn sample_index(rng: &mut dyn RngCore, len: usize, weight: impl Fn(usize) -> f64) -> usize {
    let mut target: f64 = rng.gen();
    let mut last_positive = 0;
    for i in 0..len {
        let w = weight(i);
        if w <= 0.0 {
            continue;
        }
        if target < w {
            return i;
        }
        target -= w;
        last_positive = i;
    }
    last_positive
}

/// Dense POMDP with validated probability tables.
#[derive(Debug, Clone)]
pub struct TabularPomdp {
    discount: f64,
    // rewards[state][action]
    rewards: Vec<Vec<f64>>,
    // transitions[action][state][next]
    transitions: Vec<Vec<Vec<f64>>>,
    // observations[action][next][observation]
    observations: Vec<Vec<Vec<f64>>>,
    initial: Option<Vec<f64>>,
}

impl TabularPomdp {
    /// Builds a model, checking shapes and that every distribution sums to 1.
    pub fn new(
        discount: f64,
        rewards: Vec<Vec<f64>>,
        transitions: Vec<Vec<Vec<f64>>>,
        observations: Vec<Vec<Vec<f64>>>,
    ) -> AlphaResult<Self> {
        let invalid = |reason: String| ValidationError::InvalidModel { reason };

        if !(0.0..1.0).contains(&discount) {
            return Err(invalid(format!("discount {discount} must be in [0, 1)")).into());
        }
        let states = rewards.len();
        if states == 0 {
            return Err(invalid("model needs at least one state".to_string()).into());
        }
        let actions = transitions.len();
        if actions == 0 || observations.len() != actions {
            let reason = "transition and observation tables disagree on actions";
            return Err(invalid(reason.to_string()).into());
        }
        if rewards.iter().any(|row| row.len() != actions || row.iter().any(|r| !r.is_finite())) {
            let reason = "reward table must be states x actions and finite";
            return Err(invalid(reason.to_string()).into());
        }
        let obs_count = observations[0].first().map_or(0, Vec::len);
        if obs_count == 0 {
            return Err(invalid("model needs at least one observation".to_string()).into());
        }

        for (a, table) in transitions.iter().enumerate() {
            if table.len() != states {
                let reason = format!("transition table for action {a} has wrong shape");
                return Err(invalid(reason).into());
            }
            for (s, row) in table.iter().enumerate() {
                check_distribution(row, states)
                    .map_err(|why| invalid(format!("transition a={a} s={s}: {why}")))?;
            }
        }
        for (a, table) in observations.iter().enumerate() {
            if table.len() != states {
                let reason = format!("observation table for action {a} has wrong shape");
                return Err(invalid(reason).into());
            }
            for (s, row) in table.iter().enumerate() {
                check_distribution(row, obs_count)
                    .map_err(|why| invalid(format!("observation a={a} s'={s}: {why}")))?;
            }
        }

        Ok(Self {
            discount,
            rewards,
            transitions,
            observations,
            initial: None,
        })
    }

    /// Overrides the initial belief.
    pub fn with_initial_belief(mut self, initial: Vec<f64>) -> AlphaResult<Self> {
        BeliefState::from_dense(&initial)?;
        if initial.len() != self.rewards.len() {
            return Err(ValidationError::DimensionMismatch {
                expected: self.rewards.len(),
                actual: initial.len(),
            }
            .into());
        }
        self.initial = Some(initial);
        Ok(self)
    }

    /// The classic tiger problem: listen, open left, open right.
    ///
    /// States: tiger-left, tiger-right. Observations: hear-left, hear-right.
    pub fn tiger(discount: f64) -> AlphaResult<Self> {
        let listen = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let reset = vec![vec![0.5, 0.5], vec![0.5, 0.5]];
        let accurate = vec![vec![0.85, 0.15], vec![0.15, 0.85]];
        Self::new(
            discount,
            vec![vec![-1.0, -100.0, 10.0], vec![-1.0, 10.0, -100.0]],
            vec![listen, reset.clone(), reset.clone()],
            vec![accurate, reset.clone(), reset],
        )
    }
}

fn check_distribution(row: &[f64], len: usize) -> Result<(), String> {
    if row.len() != len {
        return Err(format!("expected {len} entries, got {}", row.len()));
    }
    if row.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err("probabilities must be finite and non-negative".to_string());
    }
    let total: f64 = row.iter().sum();
    if (total - 1.0).abs() > ROW_SUM_TOLERANCE {
        return Err(format!("probabilities sum to {total}"));
    }
    Ok(())
}

impl Pomdp for TabularPomdp {
    fn state_count(&self) -> usize {
        self.rewards.len()
    }

    fn action_count(&self) -> usize {
        self.transitions.len()
    }

    fn observation_count(&self) -> usize {
        self.observations[0][0].len()
    }

    fn discount(&self) -> f64 {
        self.discount
    }

    fn reward(&self, state: usize, action: usize) -> f64 {
        self.rewards[state][action]
    }

    fn transition(&self, state: usize, action: usize, next: usize) -> f64 {
        self.transitions[action][state][next]
    }

    fn observation(&self, action: usize, next: usize, observation: usize) -> f64 {
        self.observations[action][next][observation]
    }

    fn initial_belief(&self) -> AlphaResult<BeliefState> {
        match &self.initial {
            Some(initial) => BeliefState::from_dense(initial),
            None => BeliefState::uniform(self.state_count()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_tiger_is_valid() {
        let tiger = TabularPomdp::tiger(0.95).unwrap();
        assert_eq!(tiger.state_count(), 2);
        assert_eq!(tiger.action_count(), 3);
        assert_eq!(tiger.observation_count(), 2);
    }

    #[test]
    fn test_rejects_bad_distribution() {
        let err = TabularPomdp::new(
            0.9,
            vec![vec![0.0], vec![0.0]],
            vec![vec![vec![0.5, 0.4], vec![0.0, 1.0]]],
            vec![vec![vec![1.0], vec![1.0]]],
        )
        .unwrap_err();
        assert!(err.is_validation());
        assert!(TabularPomdp::tiger(1.0).is_err());
    }

    #[test]
    fn test_belief_update_after_listening() {
        let tiger = TabularPomdp::tiger(0.95).unwrap();
        let b = BeliefState::uniform(2).unwrap();
        let next = tiger.next_belief(&b, 0, 0).unwrap().unwrap();
        assert!((next.probability(0) - 0.85).abs() < 1e-12);
        assert!((tiger.observation_probability(&b, 0, 0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_impossible_observation_has_no_successor() {
        let model = TabularPomdp::new(
            0.5,
            vec![vec![0.0], vec![0.0]],
            vec![vec![vec![1.0, 0.0], vec![0.0, 1.0]]],
            vec![vec![vec![1.0, 0.0], vec![0.0, 1.0]]],
        )
        .unwrap();
        let b = BeliefState::corner(2, 0).unwrap();
        assert!(model.next_belief(&b, 0, 1).unwrap().is_none());
    }

    #[test]
    fn test_sampling_follows_support() {
        let tiger = TabularPomdp::tiger(0.95).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            assert_eq!(tiger.sample_next_state(1, 0, &mut rng), 1);
            assert!(tiger.sample_observation(0, 1, &mut rng) < 2);
        }
    }
}
