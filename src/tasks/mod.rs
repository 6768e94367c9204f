//! Task variants run on the [`TaskExecutor`](crate::executor::TaskExecutor).
//!
//! Each task keeps its result behind a mutex; submitters wait on the
//! returned handle and then take the result from the task they still hold.

mod dot_product;
mod policy_evaluation;
mod pruning;
mod value_iteration;

pub use dot_product::DotProductTask;
pub use policy_evaluation::{PolicyEvaluationConfig, PolicyEvaluationReport, PolicyEvaluationTask};
pub use pruning::{PruningStrategy, PruningTask};
pub use value_iteration::{ValueIterationConfig, ValueIterationReport, ValueIterationTask};

use std::sync::{Mutex, PoisonError};

use crate::error::{AlphaError, AlphaResult, ValidationError};

/// One-shot result slot shared by the task variants.
#[derive(Debug)]
pub(crate) struct Outcome<T> {
    slot: Mutex<Option<AlphaResult<T>>>,
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Self { slot: Mutex::new(None) }
    }
}

impl<T> Outcome<T> {
    pub(crate) fn set(&self, result: AlphaResult<T>) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(result);
    }

    pub(crate) fn take(&self) -> Option<AlphaResult<T>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub(crate) fn empty_store_error() -> AlphaError {
    ValidationError::InvalidConfig {
        reason: "value function has no vectors".to_string(),
    }
    .into()
}
