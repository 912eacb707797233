//! Data model: rating triples, aligned float storage, and the grid
//! partition that backs the parallel solver.

mod aligned;
mod grid;
mod problem;

pub use aligned::{aligned_dim, AlignedBuffer, ALIGN_BYTES, LANES};
pub use grid::GridPartition;
pub use problem::{Problem, Rating};
