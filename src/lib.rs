//! facto-rs: parallel matrix factorization for sparse rating data.
//!
//! This crate implements a block-partitioned, lock-free-per-block stochastic
//! gradient solver with adaptive per-row learning rates. Given observed
//! (user, item, rating) triples it learns dense factor matrices P and Q such
//! that `P[u] . Q[v]` approximates the rating, with training parallelized
//! across worker threads under a strict non-conflict schedule.

pub mod data;
pub mod error;
pub mod model;
pub mod predict;
pub mod rng;
pub mod training;

pub use data::{Problem, Rating};
pub use error::{Error, Result};
pub use model::{load_model, save_model, Model};
pub use predict::{PredictSummary, Predictor};
pub use training::{cross_validate, tune, CvResult, TrainParams, Trainer, TuneGrid, TuneResult};
