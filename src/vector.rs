//! Alpha vectors: the linear support functions of the value function.
//!
//! Coefficients are fixed at construction. The bookkeeping fields (insertion
//! time, hit count, dominated flag, witness) are interior-mutable so a vector
//! can be shared as `Arc<AlphaVector>` between the store, belief caches and
//! worker tasks.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::belief::BeliefState;
use crate::error::{AlphaResult, ValidationError};

/// Belief entries with less mass than this are skipped by
/// [`AlphaVector::approximate_dot_product`].
pub const APPROXIMATION_MASS_FLOOR: f64 = 1e-3;

/// Insertion time of a vector that was never inserted into a store.
pub const NOT_INSERTED: u64 = 0;

/// A linear function over beliefs, tagged with the action it recommends.
pub struct AlphaVector {
    action: usize,
    coefficients: Vec<f64>,
    insertion_time: AtomicU64,
    hit_count: AtomicU64,
    dominated: AtomicBool,
    witness: Mutex<Weak<BeliefState>>,
}

impl AlphaVector {
    /// Creates a vector for `action`. Coefficients must be finite.
    pub fn new(action: usize, coefficients: Vec<f64>) -> AlphaResult<Self> {
        if let Some(state) = coefficients.iter().position(|c| !c.is_finite()) {
            return Err(ValidationError::NonFiniteCoefficient { state }.into());
        }
        Ok(Self {
            action,
            coefficients,
            insertion_time: AtomicU64::new(NOT_INSERTED),
            hit_count: AtomicU64::new(0),
            dominated: AtomicBool::new(false),
            witness: Mutex::new(Weak::new()),
        })
    }

    /// Creates a vector whose coefficients are all `value`.
    pub fn constant(action: usize, state_count: usize, value: f64) -> AlphaResult<Self> {
        Self::new(action, vec![value; state_count])
    }

    /// Attaches a witness belief.
    #[must_use]
    pub fn with_witness(self, witness: &Arc<BeliefState>) -> Self {
        self.set_witness(witness);
        self
    }

    /// Action recommended wherever this vector is maximal.
    #[must_use]
    pub const fn action(&self) -> usize {
        self.action
    }

    /// Coefficients indexed by state.
    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Number of states covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    /// Returns true if the vector has no coefficients.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Inner product with the belief, visiting only its non-zero entries.
    ///
    /// # Panics
    /// If the belief has support outside this vector's states. The store
    /// checks dimensions before evaluating.
    #[must_use]
    pub fn dot_product(&self, belief: &BeliefState) -> f64 {
        belief
            .nonzero()
            .map(|(s, p)| self.coefficients[s] * p)
            .sum()
    }

    /// Cheaper estimate of [`Self::dot_product`] over the belief's
    /// high-mass entries only. Not a certified bound.
    #[must_use]
    pub fn approximate_dot_product(&self, belief: &BeliefState) -> f64 {
        belief
            .nonzero()
            .filter(|&(_, p)| p >= APPROXIMATION_MASS_FLOOR)
            .map(|(s, p)| self.coefficients[s] * p)
            .sum()
    }

    /// True iff every coefficient is at least the other's.
    ///
    /// Vectors of different length never dominate each other.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        self.coefficients.len() == other.coefficients.len()
            && self
                .coefficients
                .iter()
                .zip(other.coefficients.iter())
                .all(|(a, b)| a >= b)
    }

    /// True iff both vectors have identical coefficients.
    #[must_use]
    pub fn same_coefficients(&self, other: &Self) -> bool {
        self.coefficients == other.coefficients
    }

    /// Largest coefficient, or negative infinity for an empty vector.
    #[must_use]
    pub fn max_coefficient(&self) -> f64 {
        self.coefficients.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Smallest coefficient, or positive infinity for an empty vector.
    #[must_use]
    pub fn min_coefficient(&self) -> f64 {
        self.coefficients.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Store change counter at insertion, or [`NOT_INSERTED`].
    #[must_use]
    pub fn insertion_time(&self) -> u64 {
        self.insertion_time.load(Ordering::Acquire)
    }

    /// Sets the insertion time if the vector was never inserted. Returns
    /// false if some store already owns it.
    pub(crate) fn claim(&self, time: u64) -> bool {
        self.insertion_time
            .compare_exchange(NOT_INSERTED, time, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Number of best-vector lookups that selected this vector.
    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub(crate) fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Clears the hit counter.
    pub fn reset_hit_count(&self) {
        self.hit_count.store(0, Ordering::Relaxed);
    }

    /// True once the vector has been pruned out of a store.
    #[must_use]
    pub fn is_dominated(&self) -> bool {
        self.dominated.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dominated(&self) {
        self.dominated.store(true, Ordering::Release);
    }

    /// The witness belief, if one was attached and is still alive.
    #[must_use]
    pub fn witness(&self) -> Option<Arc<BeliefState>> {
        self.witness
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    /// Records a witness belief without taking ownership of it.
    pub fn set_witness(&self, witness: &Arc<BeliefState>) {
        *self.witness.lock().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(witness);
    }

    /// A copy with the same action and coefficients and fresh metadata.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            action: self.action,
            coefficients: self.coefficients.clone(),
            insertion_time: AtomicU64::new(NOT_INSERTED),
            hit_count: AtomicU64::new(0),
            dominated: AtomicBool::new(false),
            witness: Mutex::new(Weak::new()),
        }
    }
}

impl fmt::Debug for AlphaVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlphaVector")
            .field("action", &self.action)
            .field("coefficients", &self.coefficients)
            .field("insertion_time", &self.insertion_time())
            .field("hit_count", &self.hit_count())
            .field("dominated", &self.is_dominated())
            .finish()
    }
}
