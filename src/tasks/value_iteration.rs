//! Iterate-to-convergence driver for a [`Planner`].

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AlphaError, AlphaResult, ValidationError};
use crate::executor::{CancellationToken, Task};
use crate::planner::Planner;
use crate::store::ValueFunctionStore;

use super::Outcome;

/// Convergence parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueIterationConfig {
    /// Upper bound on planner iterations.
    pub max_iterations: usize,
    /// Stop once an iteration changes no value by more than this.
    pub epsilon: f64,
}

impl Default for ValueIterationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            epsilon: 1e-3,
        }
    }
}

/// Result of a value iteration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueIterationReport {
    /// Planner that ran.
    pub planner: String,
    /// Iterations completed.
    pub iterations: usize,
    /// Residual of the last completed iteration.
    pub residual: f64,
    /// The residual fell to epsilon or below.
    pub converged: bool,
    /// The run stopped on cancellation.
    pub cancelled: bool,
    /// Store size at the end of the run.
    pub vector_count: usize,
}

/// Runs a planner against a store until convergence, the iteration limit,
/// or cancellation.
pub struct ValueIterationTask {
    planner: Mutex<Box<dyn Planner>>,
    store: Arc<ValueFunctionStore>,
    config: ValueIterationConfig,
    outcome: Outcome<ValueIterationReport>,
}

impl ValueIterationTask {
    /// Creates the task.
    pub fn new(
        planner: Box<dyn Planner>,
        store: Arc<ValueFunctionStore>,
        config: ValueIterationConfig,
    ) -> AlphaResult<Self> {
        if !config.epsilon.is_finite() || config.epsilon < 0.0 {
            return Err(ValidationError::InvalidConfig {
                reason: format!("epsilon {} must be finite and non-negative", config.epsilon),
            }
            .into());
        }
        Ok(Self {
            planner: Mutex::new(planner),
            store,
            config,
            outcome: Outcome::default(),
        })
    }

    /// Takes the report once the task has run.
    pub fn take_report(&self) -> Option<AlphaResult<ValueIterationReport>> {
        self.outcome.take()
    }

    fn iterate(&self, token: &CancellationToken) -> AlphaResult<ValueIterationReport> {
        let mut planner = self
            .planner
            .lock()
            .map_err(|_| AlphaError::poisoned("value_iteration.planner"))?;
        let mut report = ValueIterationReport {
            planner: planner.name().to_string(),
            iterations: 0,
            residual: f64::INFINITY,
            converged: false,
            cancelled: false,
            vector_count: 0,
        };

        while report.iterations < self.config.max_iterations {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let residual = planner.iterate(&self.store, token)?;
            if token.is_cancelled() {
                // A partial sweep's residual says nothing about convergence.
                report.cancelled = true;
                break;
            }
            report.iterations += 1;
            report.residual = residual;
            debug!(
                store = %self.store.id(),
                iteration = report.iterations,
                residual,
                "planner iteration"
            );
            if residual <= self.config.epsilon {
                report.converged = true;
                break;
            }
        }
        report.vector_count = self.store.len()?;
        Ok(report)
    }
}

impl Task for ValueIterationTask {
    fn kind(&self) -> &'static str {
        "value_iteration"
    }

    fn run(&self, token: &CancellationToken) {
        let result = self.iterate(token);
        match &result {
            Ok(report) => info!(
                store = %self.store.id(),
                planner = %report.planner,
                iterations = report.iterations,
                residual = report.residual,
                converged = report.converged,
                cancelled = report.cancelled,
                "value iteration finished"
            ),
            Err(e) => warn!(store = %self.store.id(), error = %e, "value iteration failed"),
        }
        self.outcome.set(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::BeliefState;
    use crate::planner::PointBasedBackup;
    use crate::pomdp::{Pomdp, TabularPomdp};
    use crate::store::StoreConfig;

    fn task(config: ValueIterationConfig) -> ValueIterationTask {
        let model: Arc<dyn Pomdp> = Arc::new(TabularPomdp::tiger(0.9).unwrap());
        let beliefs = vec![
            BeliefState::uniform(2).unwrap(),
            BeliefState::from_dense(&[0.9, 0.1]).unwrap(),
            BeliefState::from_dense(&[0.1, 0.9]).unwrap(),
        ];
        let planner = PointBasedBackup::new(model, beliefs).unwrap();
        let store = Arc::new(ValueFunctionStore::new(2, StoreConfig::default()).unwrap());
        ValueIterationTask::new(Box::new(planner), store, config).unwrap()
    }

    #[test]
    fn test_runs_to_convergence() {
        let t = task(ValueIterationConfig {
            max_iterations: 500,
            epsilon: 1e-3,
        });
        t.run(&CancellationToken::new());
        let report = t.take_report().unwrap().unwrap();
        assert!(report.converged);
        assert!(report.residual <= 1e-3);
        assert!(report.vector_count >= 1);
        assert_eq!(report.planner, "point_based_backup");
    }

    #[test]
    fn test_stops_at_iteration_limit() {
        let t = task(ValueIterationConfig {
            max_iterations: 2,
            epsilon: 0.0,
        });
        t.run(&CancellationToken::new());
        let report = t.take_report().unwrap().unwrap();
        assert_eq!(report.iterations, 2);
        assert!(!report.converged);
    }

    #[test]
    fn test_cancelled_run_reports_cancellation() {
        let t = task(ValueIterationConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        t.run(&token);
        let report = t.take_report().unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn test_rejects_negative_epsilon() {
        let model: Arc<dyn Pomdp> = Arc::new(TabularPomdp::tiger(0.9).unwrap());
        let planner = PointBasedBackup::new(model, vec![BeliefState::uniform(2).unwrap()]).unwrap();
        let store = Arc::new(ValueFunctionStore::new(2, StoreConfig::default()).unwrap());
        let config = ValueIterationConfig {
            max_iterations: 1,
            epsilon: -1.0,
        };
        assert!(ValueIterationTask::new(Box::new(planner), store, config).is_err());
    }

    struct DivergingPlanner;

    impl Planner for DivergingPlanner {
        fn name(&self) -> &str {
            "diverging"
        }

        fn iterate(
            &mut self,
            _store: &ValueFunctionStore,
            _token: &CancellationToken,
        ) -> AlphaResult<f64> {
            Err(AlphaError::internal("backup produced a non-finite value"))
        }
    }

    #[test]
    fn test_planner_error_is_reported() {
        let store = Arc::new(ValueFunctionStore::new(2, StoreConfig::default()).unwrap());
        let t = ValueIterationTask::new(
            Box::new(DivergingPlanner),
            Arc::clone(&store),
            ValueIterationConfig::default(),
        )
        .unwrap();
        t.run(&CancellationToken::new());
        let err = t.take_report().unwrap().unwrap_err();
        assert!(matches!(err, AlphaError::Internal { .. }));
        assert!(store.is_empty().unwrap());
    }
}
