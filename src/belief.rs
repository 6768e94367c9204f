//! Belief states and their per-store evaluation caches.
//!
//! A belief is a probability distribution over hidden states, kept as a
//! sparse, state-sorted list of non-zero entries. Each belief hosts cache
//! slots that the value-function store fills in; entries are tagged with the
//! owning store's id and change counter so stale results are recognised
//! rather than trusted.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;

use crate::error::{AlphaResult, ValidationError};
use crate::store::StoreId;
use crate::vector::AlphaVector;

#[derive(Debug, Clone)]
struct CachedBest {
    store: StoreId,
    stamp: u64,
    vector: Arc<AlphaVector>,
}

#[derive(Debug, Clone, Copy)]
struct CachedValue {
    store: StoreId,
    stamp: u64,
    value: f64,
}

#[derive(Debug, Default)]
struct CacheSlots {
    best: Option<CachedBest>,
    value: Option<CachedValue>,
    approximate: Option<CachedValue>,
}

/// Cache slots hosted on a belief on behalf of a value-function store.
///
/// The cache holds plain data, so a poisoned lock is recovered rather than
/// reported: the worst case is a recomputation.
#[derive(Debug, Default)]
pub struct BeliefCache {
    slots: Mutex<CacheSlots>,
}

impl BeliefCache {
    fn slots(&self) -> MutexGuard<'_, CacheSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached best vector and its stamp, if it was recorded by `store`.
    pub(crate) fn best_for(&self, store: StoreId) -> Option<(Arc<AlphaVector>, u64)> {
        self.slots()
            .best
            .as_ref()
            .filter(|c| c.store == store)
            .map(|c| (Arc::clone(&c.vector), c.stamp))
    }

    pub(crate) fn set_best(&self, store: StoreId, vector: Arc<AlphaVector>, stamp: u64) {
        self.slots().best = Some(CachedBest { store, stamp, vector });
    }

    pub(crate) fn value_for(&self, store: StoreId) -> Option<(f64, u64)> {
        self.slots()
            .value
            .filter(|c| c.store == store)
            .map(|c| (c.value, c.stamp))
    }

    pub(crate) fn set_value(&self, store: StoreId, value: f64, stamp: u64) {
        self.slots().value = Some(CachedValue { store, stamp, value });
    }

    pub(crate) fn approximate_for(&self, store: StoreId) -> Option<(f64, u64)> {
        self.slots()
            .approximate
            .filter(|c| c.store == store)
            .map(|c| (c.value, c.stamp))
    }

    pub(crate) fn set_approximate(&self, store: StoreId, value: f64, stamp: u64) {
        self.slots().approximate = Some(CachedValue { store, stamp, value });
    }

    /// Drops every cached entry.
    pub fn invalidate(&self) {
        *self.slots() = CacheSlots::default();
    }

    /// Returns true if no slot is filled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let slots = self.slots();
        slots.best.is_none() && slots.value.is_none() && slots.approximate.is_none()
    }
}

/// A probability distribution over `state_count` hidden states.
pub struct BeliefState {
    state_count: usize,
    entries: Vec<(usize, f64)>,
    cache: BeliefCache,
}

impl BeliefState {
    /// Builds a belief from `(state, mass)` pairs.
    ///
    /// Duplicate states are summed, zero entries dropped, and the result is
    /// normalised to total mass 1.
    pub fn new(
        state_count: usize,
        entries: impl IntoIterator<Item = (usize, f64)>,
    ) -> AlphaResult<Self> {
        let mut merged: Vec<(usize, f64)> = Vec::new();
        for (state, mass) in entries {
            if state >= state_count {
                return Err(ValidationError::StateOutOfRange { state, state_count }.into());
            }
            if !mass.is_finite() || mass < 0.0 {
                return Err(ValidationError::InvalidProbability { state, value: mass }.into());
            }
            if mass > 0.0 {
                merged.push((state, mass));
            }
        }
        merged.sort_by_key(|&(s, _)| s);
        merged.dedup_by(|next, kept| {
            if next.0 == kept.0 {
                kept.1 += next.1;
                true
            } else {
                false
            }
        });

        let total: f64 = merged.iter().map(|&(_, p)| p).sum();
        if total <= 0.0 {
            return Err(ValidationError::ZeroMass.into());
        }
        for entry in &mut merged {
            entry.1 /= total;
        }

        Ok(Self {
            state_count,
            entries: merged,
            cache: BeliefCache::default(),
        })
    }

    /// Builds a belief from a dense probability vector.
    pub fn from_dense(probabilities: &[f64]) -> AlphaResult<Self> {
        Self::new(probabilities.len(), probabilities.iter().copied().enumerate())
    }

    /// The uniform belief over `state_count` states.
    pub fn uniform(state_count: usize) -> AlphaResult<Self> {
        Self::new(state_count, (0..state_count).map(|s| (s, 1.0)))
    }

    /// The belief that puts all mass on `state`.
    pub fn corner(state_count: usize, state: usize) -> AlphaResult<Self> {
        Self::new(state_count, [(state, 1.0)])
    }

    /// Number of underlying states.
    #[must_use]
    pub const fn state_count(&self) -> usize {
        self.state_count
    }

    /// Non-zero entries, sorted by state.
    #[must_use]
    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    /// Iterates over the non-zero entries.
    pub fn nonzero(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.entries.iter().copied()
    }

    /// Number of states with non-zero mass.
    #[must_use]
    pub fn support_size(&self) -> usize {
        self.entries.len()
    }

    /// Mass on `state` (zero if absent).
    #[must_use]
    pub fn probability(&self, state: usize) -> f64 {
        self.entries
            .binary_search_by_key(&state, |&(s, _)| s)
            .map_or(0.0, |idx| self.entries[idx].1)
    }

    /// Dense copy of the distribution.
    #[must_use]
    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; self.state_count];
        for &(s, p) in &self.entries {
            dense[s] = p;
        }
        dense
    }

    /// Draws a state according to the belief.
    pub fn sample_state<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let mut target: f64 = rng.gen();
        for &(s, p) in &self.entries {
            if target < p {
                return s;
            }
            target -= p;
        }
        // Rounding can leave a sliver of mass past the last entry.
        self.entries.last().map_or(0, |&(s, _)| s)
    }

    /// Cache slots hosted on this belief.
    #[must_use]
    pub fn cache(&self) -> &BeliefCache {
        &self.cache
    }
}

impl Clone for BeliefState {
    /// Clones the distribution with an empty cache.
    fn clone(&self) -> Self {
        Self {
            state_count: self.state_count,
            entries: self.entries.clone(),
            cache: BeliefCache::default(),
        }
    }
}

impl fmt::Debug for BeliefState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeliefState")
            .field("state_count", &self.state_count)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl Ord for BeliefState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.state_count.cmp(&other.state_count).then_with(|| {
            for (a, b) in self.entries.iter().zip(other.entries.iter()) {
                let ord = a.0.cmp(&b.0).then_with(|| a.1.total_cmp(&b.1));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            self.entries.len().cmp(&other.entries.len())
        })
    }
}

impl PartialOrd for BeliefState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for BeliefState {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BeliefState {}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_new_normalises_and_merges() {
        let b = BeliefState::new(3, [(2, 1.0), (0, 1.0), (2, 2.0), (1, 0.0)]).unwrap();
        assert_eq!(b.support_size(), 2);
        assert!((b.probability(0) - 0.25).abs() < 1e-12);
        assert!((b.probability(2) - 0.75).abs() < 1e-12);
        assert_eq!(b.probability(1), 0.0);
    }

    #[test]
    fn test_new_rejects_bad_input() {
        assert!(BeliefState::new(2, [(2, 1.0)]).is_err());
        assert!(BeliefState::new(2, [(0, -0.5)]).is_err());
        assert!(BeliefState::new(2, [(0, f64::NAN)]).is_err());
        assert!(BeliefState::new(2, [(0, 0.0)]).is_err());
    }

    #[test]
    fn test_corner_and_uniform() {
        let c = BeliefState::corner(4, 3).unwrap();
        assert_eq!(c.entries(), &[(3, 1.0)]);
        let u = BeliefState::uniform(4).unwrap();
        assert_eq!(u.to_dense(), vec![0.25; 4]);
    }

    #[test]
    fn test_ordering_is_total_and_ignores_cache() {
        let a = BeliefState::from_dense(&[0.5, 0.5]).unwrap();
        let b = BeliefState::from_dense(&[0.25, 0.75]).unwrap();
        let c = a.clone();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn test_sample_state_respects_support() {
        let b = BeliefState::new(5, [(1, 0.5), (4, 0.5)]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let s = b.sample_state(&mut rng);
            assert!(s == 1 || s == 4);
        }
    }

    #[test]
    fn test_clone_starts_with_empty_cache() {
        let b = BeliefState::uniform(2).unwrap();
        let store = StoreId::new();
        b.cache().set_value(store, 1.0, 3);
        assert!(!b.cache().is_empty());
        assert!(b.clone().cache().is_empty());
        b.cache().invalidate();
        assert!(b.cache().is_empty());
    }

    #[test]
    fn test_cache_is_scoped_per_store() {
        let b = BeliefState::uniform(2).unwrap();
        let mine = StoreId::new();
        let other = StoreId::new();
        b.cache().set_value(mine, 2.5, 4);
        assert_eq!(b.cache().value_for(mine), Some((2.5, 4)));
        assert_eq!(b.cache().value_for(other), None);
    }
}
