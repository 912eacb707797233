//! Parallel SGD training.
//!
//! This module provides the solver core and its coordination pieces:
//!
//! - [`TrainParams`]: solver configuration and defaults
//! - [`Trainer`]: orchestrates shuffle, scale, partition, epochs, restore
//! - [`Scheduler`]: hands out grid blocks under the non-conflict invariant
//! - [`cross_validate`]: k-fold validation over held-out blocks
//! - [`tune`]: grid search scored by cross-validation
//! - [`TrainingLogger`], [`Verbosity`]: per-epoch progress tables

mod cross_validate;
mod logger;
mod params;
mod scheduler;
mod sgd;
mod trainer;
mod tune;

pub use cross_validate::{cross_validate, CvResult};
pub use logger::{TrainingLogger, Verbosity};
pub use params::TrainParams;
pub use scheduler::Scheduler;
pub use trainer::Trainer;
pub use tune::{tune, TuneGrid, TuneResult};
