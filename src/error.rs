//! Error types for alphaplan.
//!
//! All errors are strongly typed using thiserror, split by the layer
//! that raises them. Empty-store queries are not errors: they return
//! sentinel values (negative infinity, `None`).

use thiserror::Error;

/// Validation errors raised before any state is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Dimension mismatch: expected {expected} states, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("Probability {value} for state {state} is not a finite non-negative number")]
    InvalidProbability {
        state: usize,
        value: f64,
    },

    #[error("State index {state} is out of range for {state_count} states")]
    StateOutOfRange {
        state: usize,
        state_count: usize,
    },

    #[error("Belief has zero total probability mass")]
    ZeroMass,

    #[error("Coefficient at state {state} is not finite")]
    NonFiniteCoefficient {
        state: usize,
    },

    #[error("Tolerance {value} must be finite and non-negative")]
    InvalidTolerance {
        value: f64,
    },

    #[error("Witness search needs a non-empty reference set")]
    EmptyReferenceSet,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Invalid model: {reason}")]
    InvalidModel {
        reason: String,
    },
}

/// Execution errors raised by the task executor.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Executor is shutting down; task '{kind}' was not accepted")]
    ExecutorShutdown {
        kind: String,
    },

    #[error("Failed to spawn worker thread: {message}")]
    WorkerSpawn {
        message: String,
    },
}

/// Persistence errors for the value-function document.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to serialize value function: {message}")]
    SerializationFailed {
        message: String,
    },

    #[error("Failed to parse value function: {message}")]
    DeserializationFailed {
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error type for alphaplan.
#[derive(Debug, Error)]
pub enum AlphaError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl AlphaError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error for a poisoned lock.
    pub(crate) fn poisoned(context: &'static str) -> Self {
        Self::internal(format!("poisoned lock: {context}"))
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a persistence error.
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for alphaplan operations.
pub type AlphaResult<T> = Result<T, AlphaError>;
