//! The value-function store.
//!
//! A store is an insertion-ordered set of [`AlphaVector`]s whose upper
//! envelope approximates the value function. Every structural mutation bumps
//! a change counter; beliefs cache evaluation results tagged with that
//! counter so they can be revalidated cheaply.
//!
//! Concurrency: the vector set sits behind a reader/writer lock. Lookups and
//! evaluation passes ([`ValueFunctionStore::begin_evaluation`]) hold the read
//! side; every mutation takes the write side and therefore waits for open
//! passes to end. Evaluators never observe a half-applied mutation.

mod persist;
mod prune;

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::belief::BeliefState;
use crate::error::{AlphaError, AlphaResult, ValidationError};
use crate::executor::{on_worker_thread, TaskExecutor, TaskPhase};
use crate::tasks::DotProductTask;
use crate::vector::AlphaVector;

pub use persist::{from_json, load, save, to_json_pretty, ValueFunctionDocument, VectorRecord};
pub use prune::PruneReport;

/// Unique identity of a store, used to scope belief caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Creates a new random store ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Margin a witness must clear, and slack used by sampling prune.
    pub tolerance: f64,
    /// Whether lookups read and fill belief caches.
    pub caching: bool,
    /// Minimum set size before full scans fan out to the executor.
    pub parallel_threshold: usize,
    /// Vectors per dot-product task when fanning out.
    pub chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            caching: true,
            parallel_threshold: 256,
            chunk_size: 64,
        }
    }
}

impl StoreConfig {
    /// Checks the configuration for invalid values.
    pub fn validate(&self) -> AlphaResult<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ValidationError::InvalidTolerance { value: self.tolerance }.into());
        }
        if self.chunk_size == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "chunk_size must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug)]
struct StoreState {
    vectors: Vec<Arc<AlphaVector>>,
    change_counter: u64,
    // Counter value of the most recent mutation that removed vectors.
    last_removal: u64,
    max_value: f64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            vectors: Vec::new(),
            change_counter: 0,
            last_removal: 0,
            max_value: f64::NEG_INFINITY,
        }
    }
}

impl StoreState {
    fn bump(&mut self) -> u64 {
        self.change_counter += 1;
        self.change_counter
    }

    /// Appends `vector` stamped with `time`. A vector some store already
    /// owns is inserted as a copy that keeps its witness.
    fn push_stamped(&mut self, vector: Arc<AlphaVector>, time: u64) {
        let vector = if vector.claim(time) {
            vector
        } else {
            let copy = vector.duplicate();
            if let Some(witness) = vector.witness() {
                copy.set_witness(&witness);
            }
            copy.claim(time);
            Arc::new(copy)
        };
        self.max_value = self.max_value.max(vector.max_coefficient());
        self.vectors.push(vector);
    }

    fn record_removal(&mut self, removed: &[Arc<AlphaVector>], time: u64) {
        if removed.is_empty() {
            return;
        }
        for v in removed {
            v.mark_dominated();
        }
        self.last_removal = time;
    }

    /// Replaces the vector set with `retained` as one mutation.
    fn replace(&mut self, retained: Vec<Arc<AlphaVector>>, removed: &[Arc<AlphaVector>]) {
        if removed.is_empty() {
            return;
        }
        let time = self.bump();
        self.record_removal(removed, time);
        self.vectors = retained;
    }

    /// Inserts `vector`, optionally enforcing pointwise non-domination.
    fn add(&mut self, vector: Arc<AlphaVector>, prune_dominated: bool) -> bool {
        if !prune_dominated {
            let time = self.bump();
            self.push_stamped(vector, time);
            return true;
        }

        // Equal coefficients count as domination, so duplicates are rejected.
        if self.vectors.iter().any(|existing| existing.dominates(&vector)) {
            return false;
        }

        let (removed, retained): (Vec<_>, Vec<_>) = std::mem::take(&mut self.vectors)
            .into_iter()
            .partition(|existing| vector.dominates(existing));
        self.vectors = retained;
        let time = self.bump();
        self.record_removal(&removed, time);
        self.push_stamped(vector, time);
        true
    }
}

/// A set of alpha vectors approximating a value function.
pub struct ValueFunctionStore {
    id: StoreId,
    state_count: usize,
    config: StoreConfig,
    state: RwLock<StoreState>,
    executor: Option<Arc<TaskExecutor>>,
}

impl ValueFunctionStore {
    /// Creates an empty store over `state_count` states.
    pub fn new(state_count: usize, config: StoreConfig) -> AlphaResult<Self> {
        if state_count == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "state_count must be at least 1".to_string(),
            }
            .into());
        }
        config.validate()?;
        Ok(Self {
            id: StoreId::new(),
            state_count,
            config,
            state: RwLock::new(StoreState::default()),
            executor: None,
        })
    }

    /// Attaches an executor used to parallelise large full scans.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Identity used to scope belief caches.
    #[must_use]
    pub const fn id(&self) -> StoreId {
        self.id
    }

    /// Number of states each vector covers.
    #[must_use]
    pub const fn state_count(&self) -> usize {
        self.state_count
    }

    /// The store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Witness / sampling tolerance.
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.config.tolerance
    }

    /// Whether belief caches are used.
    #[must_use]
    pub fn caching(&self) -> bool {
        self.config.caching
    }

    /// The attached executor, if any.
    #[must_use]
    pub fn executor(&self) -> Option<&Arc<TaskExecutor>> {
        self.executor.as_ref()
    }

    fn read(&self, context: &'static str) -> AlphaResult<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| AlphaError::poisoned(context))
    }

    fn write(&self, context: &'static str) -> AlphaResult<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| AlphaError::poisoned(context))
    }

    fn check_belief(&self, belief: &BeliefState) -> AlphaResult<()> {
        if belief.state_count() != self.state_count {
            return Err(ValidationError::DimensionMismatch {
                expected: self.state_count,
                actual: belief.state_count(),
            }
            .into());
        }
        Ok(())
    }

    fn check_vector(&self, vector: &AlphaVector) -> AlphaResult<()> {
        if vector.len() != self.state_count {
            return Err(ValidationError::DimensionMismatch {
                expected: self.state_count,
                actual: vector.len(),
            }
            .into());
        }
        if let Some(witness) = vector.witness() {
            self.check_belief(&witness)?;
        }
        Ok(())
    }

    /// Number of stored vectors.
    pub fn len(&self) -> AlphaResult<usize> {
        Ok(self.read("store.len")?.vectors.len())
    }

    /// Returns true if no vector is stored.
    pub fn is_empty(&self) -> AlphaResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of the stored vectors, in insertion order.
    pub fn vectors(&self) -> AlphaResult<Vec<Arc<AlphaVector>>> {
        Ok(self.read("store.vectors")?.vectors.clone())
    }

    /// Current change counter.
    pub fn change_counter(&self) -> AlphaResult<u64> {
        Ok(self.read("store.change_counter")?.change_counter)
    }

    /// Largest coefficient ever inserted, or negative infinity.
    pub fn max_value(&self) -> AlphaResult<f64> {
        Ok(self.read("store.max_value")?.max_value)
    }

    /// Value of the upper envelope at `belief`, or negative infinity when
    /// the store is empty.
    pub fn value_at(&self, belief: &BeliefState) -> AlphaResult<f64> {
        self.check_belief(belief)?;
        let state = self.read("store.value_at")?;
        Ok(self.value_in(&state, belief))
    }

    /// Like [`Self::value_at`] but using the approximate dot product.
    pub fn approximate_value_at(&self, belief: &BeliefState) -> AlphaResult<f64> {
        self.check_belief(belief)?;
        let state = self.read("store.approximate_value_at")?;
        Ok(self.approximate_value_in(&state, belief))
    }

    /// The vector maximising the dot product with `belief`.
    pub fn get_max_alpha(&self, belief: &BeliefState) -> AlphaResult<Option<Arc<AlphaVector>>> {
        self.check_belief(belief)?;
        let state = self.read("store.get_max_alpha")?;
        Ok(self.best_in(&state, belief))
    }

    /// Action of the maximising vector, or `None` for an empty store.
    pub fn best_action(&self, belief: &BeliefState) -> AlphaResult<Option<usize>> {
        Ok(self.get_max_alpha(belief)?.map(|v| v.action()))
    }

    /// Opens an evaluation pass. Mutations block until it is dropped.
    pub fn begin_evaluation(&self) -> AlphaResult<EvaluationPass<'_>> {
        let state = self.read("store.begin_evaluation")?;
        debug!(store = %self.id, vectors = state.vectors.len(), "evaluation pass started");
        Ok(EvaluationPass { store: self, state })
    }

    /// Inserts a vector.
    ///
    /// With `prune_dominated`, the vector is rejected (and `false` returned,
    /// store untouched) if an existing vector dominates it; otherwise every
    /// vector it dominates is removed before insertion.
    pub fn add(
        &self,
        vector: impl Into<Arc<AlphaVector>>,
        prune_dominated: bool,
    ) -> AlphaResult<bool> {
        let vector = vector.into();
        self.check_vector(&vector)?;
        let mut state = self.write("store.add")?;
        let inserted = state.add(vector, prune_dominated);
        if !inserted {
            debug!(store = %self.id, "dominated vector rejected");
        }
        Ok(inserted)
    }

    /// Inserts a vector unless it is dominated by (or equal to) an existing
    /// one, removing every vector it dominates. If the vector carries a live
    /// witness, that belief's cache is refreshed immediately.
    ///
    /// Blocks while an evaluation pass is open.
    pub fn add_prune_pointwise_dominated(
        &self,
        vector: impl Into<Arc<AlphaVector>>,
    ) -> AlphaResult<bool> {
        let vector = vector.into();
        self.check_vector(&vector)?;
        let mut state = self.write("store.add_prune_pointwise_dominated")?;
        if !state.add(Arc::clone(&vector), true) {
            debug!(store = %self.id, "dominated vector rejected");
            return Ok(false);
        }
        if let Some(witness) = vector.witness() {
            if self.config.caching {
                witness.cache().invalidate();
                self.value_in(&state, &witness);
            }
        }
        Ok(true)
    }

    /// Inserts every vector without pruning. Returns how many were added.
    pub fn add_all<I, V>(&self, vectors: I) -> AlphaResult<usize>
    where
        I: IntoIterator<Item = V>,
        V: Into<Arc<AlphaVector>>,
    {
        let vectors: Vec<Arc<AlphaVector>> = vectors.into_iter().map(Into::into).collect();
        for v in &vectors {
            self.check_vector(v)?;
        }
        let mut state = self.write("store.add_all")?;
        let added = vectors.len();
        for v in vectors {
            state.add(v, false);
        }
        Ok(added)
    }

    /// Removes every vector.
    pub fn clear(&self) -> AlphaResult<()> {
        let mut state = self.write("store.clear")?;
        let removed = std::mem::take(&mut state.vectors);
        state.replace(Vec::new(), &removed);
        state.max_value = f64::NEG_INFINITY;
        Ok(())
    }

    /// An independent store with the same configuration and copies of the
    /// vectors (fresh metadata).
    pub fn copy(&self) -> AlphaResult<Self> {
        let source = self.read("store.copy")?;
        let mut copy = StoreState::default();
        for v in &source.vectors {
            let time = copy.bump();
            copy.push_stamped(Arc::new(v.duplicate()), time);
        }
        copy.max_value = source.max_value;
        Ok(Self {
            id: StoreId::new(),
            state_count: self.state_count,
            config: self.config.clone(),
            state: RwLock::new(copy),
            executor: self.executor.clone(),
        })
    }

    /// Clears every vector's hit count.
    pub fn reset_hit_counts(&self) -> AlphaResult<()> {
        for v in &self.read("store.reset_hit_counts")?.vectors {
            v.reset_hit_count();
        }
        Ok(())
    }

    fn value_in(&self, state: &StoreState, belief: &BeliefState) -> f64 {
        if self.config.caching {
            if let Some((value, stamp)) = belief.cache().value_for(self.id) {
                if stamp >= state.change_counter {
                    return value;
                }
            }
        }
        let Some(best) = self.best_in(state, belief) else {
            return f64::NEG_INFINITY;
        };
        let value = best.dot_product(belief);
        if self.config.caching {
            belief.cache().set_value(self.id, value, state.change_counter);
        }
        value
    }

    fn approximate_value_in(&self, state: &StoreState, belief: &BeliefState) -> f64 {
        if self.config.caching {
            if let Some((value, stamp)) = belief.cache().approximate_for(self.id) {
                if stamp >= state.change_counter {
                    return value;
                }
            }
        }
        if state.vectors.is_empty() {
            return f64::NEG_INFINITY;
        }
        let value = state
            .vectors
            .iter()
            .map(|v| v.approximate_dot_product(belief))
            .fold(f64::NEG_INFINITY, f64::max);
        if self.config.caching {
            belief.cache().set_approximate(self.id, value, state.change_counter);
        }
        value
    }

    fn best_in(&self, state: &StoreState, belief: &BeliefState) -> Option<Arc<AlphaVector>> {
        if state.vectors.is_empty() {
            return None;
        }
        let best = self
            .incremental_best(state, belief)
            .unwrap_or_else(|| self.full_scan(state, belief));
        best.record_hit();
        if self.config.caching {
            belief.cache().set_best(self.id, Arc::clone(&best), state.change_counter);
        }
        Some(best)
    }

    /// Compares only vectors inserted after the cached incumbent was chosen.
    /// Ties go to the newer vector.
    fn incremental_best(
        &self,
        state: &StoreState,
        belief: &BeliefState,
    ) -> Option<Arc<AlphaVector>> {
        if !self.config.caching {
            return None;
        }
        let (mut best, stamp) = belief.cache().best_for(self.id)?;
        if stamp < state.last_removal {
            return None;
        }
        let start = state.vectors.partition_point(|v| v.insertion_time() <= stamp);
        let mut best_value = best.dot_product(belief);
        for v in &state.vectors[start..] {
            let value = v.dot_product(belief);
            if value >= best_value {
                best = Arc::clone(v);
                best_value = value;
            }
        }
        Some(best)
    }

    /// Scans every vector. Ties keep the first vector found.
    fn full_scan(&self, state: &StoreState, belief: &BeliefState) -> Arc<AlphaVector> {
        let vectors = &state.vectors;
        let mut best = 0usize;
        let mut best_value = f64::NEG_INFINITY;
        match self.parallel_values(vectors, belief) {
            Some(values) => {
                for (idx, value) in values.into_iter().enumerate() {
                    if value > best_value {
                        best = idx;
                        best_value = value;
                    }
                }
            }
            None => {
                for (idx, v) in vectors.iter().enumerate() {
                    let value = v.dot_product(belief);
                    if value > best_value {
                        best = idx;
                        best_value = value;
                    }
                }
            }
        }
        Arc::clone(&vectors[best])
    }

    /// Evaluates `vectors` on the executor, in chunks, preserving order.
    ///
    /// Returns `None` when the sequential path should be used instead.
    fn parallel_values(
        &self,
        vectors: &[Arc<AlphaVector>],
        belief: &BeliefState,
    ) -> Option<Vec<f64>> {
        let executor = self.executor.as_ref()?;
        if vectors.len() < self.config.parallel_threshold.max(1)
            || on_worker_thread()
            || executor.is_terminating()
        {
            return None;
        }

        let shared = Arc::new(belief.clone());
        let chunks: Vec<_> = vectors
            .chunks(self.config.chunk_size)
            .map(|chunk| {
                let task = Arc::new(DotProductTask::new(Arc::clone(&shared), chunk.to_vec()));
                let handle = executor.submit(Arc::clone(&task)).ok();
                (task, handle)
            })
            .collect();
        debug!(store = %self.id, chunks = chunks.len(), "full scan fanned out");

        // Workers may be blocked on this store's write lock behind the read
        // guard held here, so chunks nobody has picked up are cancelled and
        // evaluated by the caller instead of waited on.
        let mut values = Vec::with_capacity(vectors.len());
        let mut inline = 0usize;
        for (task, handle) in chunks {
            let computed = match handle {
                Some(h) if h.phase() == TaskPhase::Running => {
                    executor.wait_for(&h);
                    task.take_values()
                }
                Some(h) if h.is_done() => task.take_values(),
                Some(h) => {
                    h.cancel();
                    None
                }
                None => None,
            };
            match computed {
                Some(chunk_values) => values.extend(chunk_values),
                None => {
                    inline += 1;
                    values.extend(task.vectors().iter().map(|v| v.dot_product(belief)));
                }
            }
        }
        if inline > 0 {
            if executor.is_terminating() {
                warn!(store = %self.id, inline, "executor shutting down; chunks evaluated inline");
            } else {
                debug!(store = %self.id, inline, "queued chunks evaluated inline");
            }
        }
        Some(values)
    }
}

impl fmt::Debug for ValueFunctionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueFunctionStore")
            .field("id", &self.id)
            .field("state_count", &self.state_count)
            .field("config", &self.config)
            .field("parallel", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}

/// A frozen view of a store for the duration of an evaluation pass.
///
/// Holds the store's read lock: lookups through the pass never re-enter the
/// lock, and mutations wait until the pass is dropped.
pub struct EvaluationPass<'a> {
    store: &'a ValueFunctionStore,
    state: RwLockReadGuard<'a, StoreState>,
}

impl EvaluationPass<'_> {
    /// See [`ValueFunctionStore::value_at`].
    pub fn value_at(&self, belief: &BeliefState) -> AlphaResult<f64> {
        self.store.check_belief(belief)?;
        Ok(self.store.value_in(&self.state, belief))
    }

    /// See [`ValueFunctionStore::get_max_alpha`].
    pub fn get_max_alpha(&self, belief: &BeliefState) -> AlphaResult<Option<Arc<AlphaVector>>> {
        self.store.check_belief(belief)?;
        Ok(self.store.best_in(&self.state, belief))
    }

    /// See [`ValueFunctionStore::best_action`].
    pub fn best_action(&self, belief: &BeliefState) -> AlphaResult<Option<usize>> {
        Ok(self.get_max_alpha(belief)?.map(|v| v.action()))
    }

    /// Number of vectors visible to the pass.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.vectors.len()
    }

    /// Returns true if the pass sees no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.vectors.is_empty()
    }

    /// Change counter frozen for the pass.
    #[must_use]
    pub fn change_counter(&self) -> u64 {
        self.state.change_counter
    }
}

impl Drop for EvaluationPass<'_> {
    fn drop(&mut self) {
        debug!(store = %self.store.id, "evaluation pass ended");
    }
}
