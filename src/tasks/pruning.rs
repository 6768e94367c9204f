//! Pruning as an executor task.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::AlphaResult;
use crate::executor::{CancellationToken, Task};
use crate::sampling::UniformSimplexSampler;
use crate::store::{PruneReport, ValueFunctionStore};
use crate::witness::WitnessOracle;

use super::Outcome;

/// Which pruning pass to run.
#[derive(Clone)]
pub enum PruningStrategy {
    /// Remove pointwise-dominated vectors.
    PointwiseDominated,
    /// Usage-based pruning; see
    /// [`ValueFunctionStore::prune_low_hit_count_vectors`].
    LowHitCount {
        /// Vectors need more hits than this to survive.
        min_hit_count: u64,
        /// Vectors inserted after this time are exempt.
        exempt_after: u64,
    },
    /// Exact redundancy elimination with the given oracle.
    ExactWitness(Arc<dyn WitnessOracle>),
    /// Approximate pruning from a seeded uniform sampler.
    RandomSampling {
        /// Beliefs to draw.
        sample_count: usize,
        /// Sampler seed.
        seed: u64,
    },
}

impl PruningStrategy {
    fn name(&self) -> &'static str {
        match self {
            Self::PointwiseDominated => "pointwise_dominated",
            Self::LowHitCount { .. } => "low_hit_count",
            Self::ExactWitness(_) => "exact_witness",
            Self::RandomSampling { .. } => "random_sampling",
        }
    }
}

impl fmt::Debug for PruningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactWitness(oracle) => {
                f.debug_tuple("ExactWitness").field(&oracle.name()).finish()
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Runs one pruning pass against a store.
///
/// The pass holds the store's write lock, so it waits for open evaluation
/// passes and blocks new ones until it finishes. Cancellation is honoured
/// before the pass starts and, for exact pruning, between candidates.
#[derive(Debug)]
pub struct PruningTask {
    store: Arc<ValueFunctionStore>,
    strategy: PruningStrategy,
    outcome: Outcome<PruneReport>,
}

impl PruningTask {
    /// Creates the task.
    #[must_use]
    pub fn new(store: Arc<ValueFunctionStore>, strategy: PruningStrategy) -> Self {
        Self {
            store,
            strategy,
            outcome: Outcome::default(),
        }
    }

    /// The strategy this task runs.
    #[must_use]
    pub fn strategy(&self) -> &PruningStrategy {
        &self.strategy
    }

    /// Takes the report once the task has run.
    pub fn take_report(&self) -> Option<AlphaResult<PruneReport>> {
        self.outcome.take()
    }

    fn prune(&self, token: &CancellationToken) -> AlphaResult<PruneReport> {
        if token.is_cancelled() {
            let size = self.store.len()?;
            return Ok(PruneReport {
                before: size,
                after: size,
                cancelled: true,
                ..PruneReport::default()
            });
        }
        match &self.strategy {
            PruningStrategy::PointwiseDominated => self.store.prune_pointwise_dominated(),
            PruningStrategy::LowHitCount {
                min_hit_count,
                exempt_after,
            } => self.store.prune_low_hit_count_vectors(*min_hit_count, *exempt_after),
            PruningStrategy::ExactWitness(oracle) => {
                self.store.prune_exact_witness_cancellable(oracle.as_ref(), token)
            }
            PruningStrategy::RandomSampling { sample_count, seed } => {
                let mut sampler = UniformSimplexSampler::seeded(*seed);
                self.store.prune_random_sampling(*sample_count, &mut sampler)
            }
        }
    }
}

impl Task for PruningTask {
    fn kind(&self) -> &'static str {
        "pruning"
    }

    fn run(&self, token: &CancellationToken) {
        let result = self.prune(token);
        match &result {
            Ok(report) => info!(
                store = %self.store.id(),
                strategy = self.strategy.name(),
                removed = report.removed(),
                cancelled = report.cancelled,
                "pruning task finished"
            ),
            Err(e) => warn!(
                store = %self.store.id(),
                strategy = self.strategy.name(),
                error = %e,
                "pruning task failed"
            ),
        }
        self.outcome.set(result);
    }
}
