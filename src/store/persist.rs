//! JSON persistence for value functions.
//!
//! The document keeps coefficients, actions and the store settings that
//! affect lookups. Insertion times, hit counts and witnesses are runtime
//! metadata and are rebuilt on load: vectors are re-inserted in document
//! order, so their relative order survives.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AlphaResult, PersistenceError, ValidationError};
use crate::vector::AlphaVector;

use super::{StoreConfig, ValueFunctionStore};

/// One stored vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Action the vector recommends.
    pub action: usize,
    /// One coefficient per state.
    pub coefficients: Vec<f64>,
}

/// Serialised form of a [`ValueFunctionStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueFunctionDocument {
    /// Number of records in `vectors`.
    pub vector_count: usize,
    /// States per vector.
    pub state_count: usize,
    /// Store tolerance.
    pub tolerance: f64,
    /// Whether the store used belief caches.
    pub caching: bool,
    /// Largest coefficient ever inserted; absent for a store that never held
    /// a vector.
    pub max_value: Option<f64>,
    /// Vectors in insertion order.
    pub vectors: Vec<VectorRecord>,
}

impl ValueFunctionDocument {
    /// Captures the current contents of `store`.
    pub fn from_store(store: &ValueFunctionStore) -> AlphaResult<Self> {
        let state = store.read("store.persist")?;
        let vectors: Vec<VectorRecord> = state
            .vectors
            .iter()
            .map(|v| VectorRecord {
                action: v.action(),
                coefficients: v.coefficients().to_vec(),
            })
            .collect();
        Ok(Self {
            vector_count: vectors.len(),
            state_count: store.state_count(),
            tolerance: store.tolerance(),
            caching: store.caching(),
            max_value: state.max_value.is_finite().then_some(state.max_value),
            vectors,
        })
    }

    /// Builds a fresh store from the document.
    pub fn into_store(self) -> AlphaResult<ValueFunctionStore> {
        if self.vector_count != self.vectors.len() {
            return Err(PersistenceError::DeserializationFailed {
                message: format!(
                    "vector_count is {} but {} vectors are present",
                    self.vector_count,
                    self.vectors.len()
                ),
            }
            .into());
        }
        let config = StoreConfig {
            tolerance: self.tolerance,
            caching: self.caching,
            ..StoreConfig::default()
        };
        let store = ValueFunctionStore::new(self.state_count, config)?;
        let mut vectors = Vec::with_capacity(self.vectors.len());
        for (idx, record) in self.vectors.into_iter().enumerate() {
            if record.coefficients.len() != self.state_count {
                return Err(ValidationError::DimensionMismatch {
                    expected: self.state_count,
                    actual: record.coefficients.len(),
                }
                .into());
            }
            let vector = AlphaVector::new(record.action, record.coefficients).map_err(|e| {
                PersistenceError::DeserializationFailed {
                    message: format!("vector {idx}: {e}"),
                }
            })?;
            vectors.push(Arc::new(vector));
        }
        store.add_all(vectors)?;
        if let Some(max) = self.max_value {
            let mut state = store.write("store.restore")?;
            state.max_value = state.max_value.max(max);
        }
        Ok(store)
    }
}

/// Serialises a store to pretty JSON.
pub fn to_json_pretty(store: &ValueFunctionStore) -> AlphaResult<String> {
    let doc = ValueFunctionDocument::from_store(store)?;
    serde_json::to_string_pretty(&doc).map_err(|e| {
        PersistenceError::SerializationFailed {
            message: e.to_string(),
        }
        .into()
    })
}

/// Rebuilds a store from JSON produced by [`to_json_pretty`].
pub fn from_json(s: &str) -> AlphaResult<ValueFunctionStore> {
    let doc: ValueFunctionDocument = serde_json::from_str(s).map_err(|e| {
        PersistenceError::DeserializationFailed {
            message: e.to_string(),
        }
    })?;
    doc.into_store()
}

/// Writes a store to `path`.
pub fn save(store: &ValueFunctionStore, path: impl AsRef<Path>) -> AlphaResult<()> {
    let path = path.as_ref();
    let json = to_json_pretty(store)?;
    fs::write(path, json).map_err(PersistenceError::from)?;
    info!(store = %store.id(), path = %path.display(), "value function saved");
    Ok(())
}

/// Reads a store from `path`.
pub fn load(path: impl AsRef<Path>) -> AlphaResult<ValueFunctionStore> {
    let path = path.as_ref();
    let json = fs::read_to_string(path).map_err(PersistenceError::from)?;
    let store = from_json(&json)?;
    let vectors = store.len()?;
    info!(store = %store.id(), path = %path.display(), vectors, "value function loaded");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::BeliefState;

    fn sample() -> ValueFunctionStore {
        let s = ValueFunctionStore::new(2, StoreConfig::default()).unwrap();
        s.add(AlphaVector::new(0, vec![2.0, 0.0]).unwrap(), false).unwrap();
        s.add(AlphaVector::new(1, vec![0.0, 2.0]).unwrap(), false).unwrap();
        s
    }

    #[test]
    fn test_json_roundtrip_preserves_values() {
        let s = sample();
        let json = to_json_pretty(&s).unwrap();
        let restored = from_json(&json).unwrap();
        assert_ne!(restored.id(), s.id());
        let b = BeliefState::from_dense(&[0.3, 0.7]).unwrap();
        assert_eq!(restored.value_at(&b).unwrap(), s.value_at(&b).unwrap());
        assert_eq!(restored.max_value().unwrap(), 2.0);
        let actions: Vec<usize> = restored.vectors().unwrap().iter().map(|v| v.action()).collect();
        assert_eq!(actions, vec![0, 1]);
    }

    #[test]
    fn test_empty_store_has_no_max_value() {
        let s = ValueFunctionStore::new(3, StoreConfig::default()).unwrap();
        let doc = ValueFunctionDocument::from_store(&s).unwrap();
        assert_eq!(doc.max_value, None);
        let restored = doc.into_store().unwrap();
        assert_eq!(restored.max_value().unwrap(), f64::NEG_INFINITY);
        assert_eq!(restored.state_count(), 3);
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let mut doc = ValueFunctionDocument::from_store(&sample()).unwrap();
        doc.vector_count = 5;
        assert!(doc.into_store().unwrap_err().is_persistence());
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(from_json("{\"vector_count\": 1").unwrap_err().is_persistence());
    }
}
