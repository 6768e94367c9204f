//! Monte-Carlo evaluation of the greedy policy of a store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::belief::BeliefState;
use crate::error::{AlphaResult, ValidationError};
use crate::executor::{CancellationToken, Task};
use crate::pomdp::Pomdp;
use crate::store::{EvaluationPass, ValueFunctionStore};

use super::{empty_store_error, Outcome};

/// Rollout parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyEvaluationConfig {
    /// Simulated episodes.
    pub trials: usize,
    /// Steps per episode.
    pub max_steps: usize,
    /// Seed for state and observation sampling.
    pub seed: u64,
}

impl Default for PolicyEvaluationConfig {
    fn default() -> Self {
        Self {
            trials: 100,
            max_steps: 100,
            seed: 0,
        }
    }
}

/// Result of a policy evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvaluationReport {
    /// Episodes that ran to the end.
    pub trials_completed: usize,
    /// Mean discounted return over completed episodes.
    pub mean_return: f64,
    /// Standard error of the mean; zero with fewer than two episodes.
    pub standard_error: f64,
    /// The run stopped on cancellation.
    pub cancelled: bool,
    /// Size of the vector set the run evaluated.
    pub vector_count: usize,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end.
    pub finished_at: DateTime<Utc>,
}

/// Simulates the store's greedy policy inside one evaluation pass.
///
/// The pass keeps the vector set frozen for the whole run, so concurrent
/// planners block on their next insert until the evaluation finishes.
pub struct PolicyEvaluationTask {
    model: Arc<dyn Pomdp>,
    store: Arc<ValueFunctionStore>,
    initial: BeliefState,
    config: PolicyEvaluationConfig,
    outcome: Outcome<PolicyEvaluationReport>,
}

impl PolicyEvaluationTask {
    /// Creates a task starting every episode from `initial`.
    pub fn new(
        model: Arc<dyn Pomdp>,
        store: Arc<ValueFunctionStore>,
        initial: BeliefState,
        config: PolicyEvaluationConfig,
    ) -> AlphaResult<Self> {
        if config.trials == 0 || config.max_steps == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "trials and max_steps must be at least 1".to_string(),
            }
            .into());
        }
        for (expected, actual) in [
            (model.state_count(), initial.state_count()),
            (model.state_count(), store.state_count()),
        ] {
            if expected != actual {
                return Err(ValidationError::DimensionMismatch { expected, actual }.into());
            }
        }
        Ok(Self {
            model,
            store,
            initial,
            config,
            outcome: Outcome::default(),
        })
    }

    /// Takes the report once the task has run.
    pub fn take_report(&self) -> Option<AlphaResult<PolicyEvaluationReport>> {
        self.outcome.take()
    }

    fn episode(
        &self,
        pass: &EvaluationPass<'_>,
        rng: &mut StdRng,
        token: &CancellationToken,
    ) -> AlphaResult<Option<f64>> {
        let model = &self.model;
        let mut belief = self.initial.clone();
        let mut state = belief.sample_state(rng);
        let mut discount = 1.0;
        let mut total = 0.0;

        for _ in 0..self.config.max_steps {
            if token.is_cancelled() {
                return Ok(None);
            }
            let action = pass.best_action(&belief)?.ok_or_else(empty_store_error)?;
            total += discount * model.reward(state, action);
            let next = model.sample_next_state(state, action, rng);
            let observation = model.sample_observation(action, next, rng);
            match model.next_belief(&belief, action, observation)? {
                Some(updated) => belief = updated,
                None => break,
            }
            state = next;
            discount *= model.discount();
        }
        Ok(Some(total))
    }

    fn evaluate(&self, token: &CancellationToken) -> AlphaResult<PolicyEvaluationReport> {
        let started_at = Utc::now();
        let pass = self.store.begin_evaluation()?;
        if pass.is_empty() {
            return Err(empty_store_error());
        }
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut returns = Vec::new();
        let mut cancelled = false;

        for _ in 0..self.config.trials {
            match self.episode(&pass, &mut rng, token)? {
                Some(r) => returns.push(r),
                None => {
                    cancelled = true;
                    break;
                }
            }
        }
        let vector_count = pass.len();
        drop(pass);

        let (mean_return, standard_error) = mean_and_error(&returns);
        Ok(PolicyEvaluationReport {
            trials_completed: returns.len(),
            mean_return,
            standard_error,
            cancelled,
            vector_count,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean_and_error(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    if samples.len() < 2 {
        return (mean, 0.0);
    }
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, (variance / n).sqrt())
}

impl Task for PolicyEvaluationTask {
    fn kind(&self) -> &'static str {
        "policy_evaluation"
    }

    fn run(&self, token: &CancellationToken) {
        let result = self.evaluate(token);
        match &result {
            Ok(report) => info!(
                store = %self.store.id(),
                trials = report.trials_completed,
                mean = report.mean_return,
                stderr = report.standard_error,
                cancelled = report.cancelled,
                "policy evaluation finished"
            ),
            Err(e) => warn!(store = %self.store.id(), error = %e, "policy evaluation failed"),
        }
        self.outcome.set(result);
    }
}
