//! # alphaplan - Alpha-vector value functions for POMDP planning
//!
//! alphaplan stores a piecewise-linear convex value function as a set of
//! alpha vectors, evaluates it at belief states with per-belief caching,
//! prunes redundant vectors, and runs planning, evaluation and pruning work
//! on a small LIFO task executor.
//!
//! ## Core Concepts
//!
//! - **BeliefState**: A sparse probability distribution over hidden states
//! - **AlphaVector**: One linear piece of the value function, tagged with an action
//! - **ValueFunctionStore**: The vector set; lookups, insertion and pruning
//! - **WitnessOracle**: Decides whether a vector contributes to the upper envelope
//! - **TaskExecutor**: Worker threads that take the newest task first
//!
//! ## Usage
//!
//! ```rust,ignore
//! use alphaplan::{AlphaVector, BeliefState, StoreConfig, ValueFunctionStore};
//!
//! let store = ValueFunctionStore::new(2, StoreConfig::default())?;
//! store.add(AlphaVector::new(0, vec![2.0, 0.0])?, true)?;
//! store.add(AlphaVector::new(1, vec![0.0, 2.0])?, true)?;
//!
//! let belief = BeliefState::from_dense(&[0.7, 0.3])?;
//! assert_eq!(store.best_action(&belief)?, Some(0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod belief;
pub mod error;
pub mod vector;

// Value function and pruning
pub mod sampling;
pub mod store;
pub mod witness;

// Execution and planning
pub mod executor;
pub mod planner;
pub mod pomdp;
pub mod tasks;

pub use belief::{BeliefCache, BeliefState};
pub use error::{AlphaError, AlphaResult, ExecutionError, PersistenceError, ValidationError};
pub use executor::{
    on_worker_thread, CancellationToken, ExecutorConfig, NoopTask, Task, TaskExecutor, TaskHandle,
    TaskId, TaskKindStats, TaskPhase, WaitOutcome,
};
pub use planner::{Planner, PointBasedBackup};
pub use pomdp::{Pomdp, TabularPomdp};
pub use sampling::{BeliefSampler, UniformSimplexSampler};
pub use store::{
    EvaluationPass, PruneReport, StoreConfig, StoreId, ValueFunctionDocument, ValueFunctionStore,
};
pub use tasks::{
    DotProductTask, PolicyEvaluationConfig, PolicyEvaluationReport, PolicyEvaluationTask,
    PruningStrategy, PruningTask, ValueIterationConfig, ValueIterationReport, ValueIterationTask,
};
pub use vector::AlphaVector;
pub use witness::{LpWitnessOracle, SkylineWitnessOracle, WitnessOracle};
