//! Batch dot products for parallel full scans.

use std::sync::{Arc, Mutex, PoisonError};

use crate::belief::BeliefState;
use crate::executor::{CancellationToken, Task};
use crate::vector::AlphaVector;

/// Computes the dot product of one belief with a chunk of vectors.
///
/// Results come back in chunk order. A cancelled run leaves no result.
#[derive(Debug)]
pub struct DotProductTask {
    belief: Arc<BeliefState>,
    vectors: Vec<Arc<AlphaVector>>,
    values: Mutex<Option<Vec<f64>>>,
}

impl DotProductTask {
    /// Creates a task over `vectors`.
    #[must_use]
    pub fn new(belief: Arc<BeliefState>, vectors: Vec<Arc<AlphaVector>>) -> Self {
        Self {
            belief,
            vectors,
            values: Mutex::new(None),
        }
    }

    /// The vectors this task evaluates.
    #[must_use]
    pub fn vectors(&self) -> &[Arc<AlphaVector>] {
        &self.vectors
    }

    /// Takes the computed values, if the task ran to completion.
    pub fn take_values(&self) -> Option<Vec<f64>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl Task for DotProductTask {
    fn kind(&self) -> &'static str {
        "dot_product"
    }

    fn run(&self, token: &CancellationToken) {
        let mut out = Vec::with_capacity(self.vectors.len());
        for v in &self.vectors {
            if token.is_cancelled() {
                return;
            }
            out.push(v.dot_product(&self.belief));
        }
        *self.values.lock().unwrap_or_else(PoisonError::into_inner) = Some(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> Vec<Arc<AlphaVector>> {
        vec![
            Arc::new(AlphaVector::new(0, vec![1.0, 0.0]).unwrap()),
            Arc::new(AlphaVector::new(1, vec![0.0, 4.0]).unwrap()),
        ]
    }

    #[test]
    fn test_computes_values_in_order() {
        let belief = Arc::new(BeliefState::from_dense(&[0.5, 0.5]).unwrap());
        let task = DotProductTask::new(belief, chunk());
        task.run(&CancellationToken::new());
        assert_eq!(task.take_values(), Some(vec![0.5, 2.0]));
        assert_eq!(task.take_values(), None);
    }

    #[test]
    fn test_cancelled_run_leaves_no_result() {
        let belief = Arc::new(BeliefState::uniform(2).unwrap());
        let task = DotProductTask::new(belief, chunk());
        let token = CancellationToken::new();
        token.cancel();
        task.run(&token);
        assert!(task.take_values().is_none());
        assert_eq!(task.vectors().len(), 2);
    }
}
