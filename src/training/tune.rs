//! Grid search over solver hyperparameters, scored by cross-validation.

use crate::data::Problem;
use crate::error::{Error, Result};

use super::cross_validate::cross_validate;
use super::params::TrainParams;

/// Candidate values for the searched parameters. Every combination of
/// `k x lambda x eta` is evaluated.
#[derive(Debug, Clone)]
pub struct TuneGrid {
    pub k: Vec<usize>,
    pub lambda: Vec<f32>,
    pub eta: Vec<f32>,
}

impl Default for TuneGrid {
    fn default() -> Self {
        Self {
            k: vec![8, 16],
            lambda: vec![0.01, 0.1],
            eta: vec![0.05, 0.1],
        }
    }
}

/// One evaluated parameter combination.
#[derive(Debug, Clone, Copy)]
pub struct TuneResult {
    pub k: usize,
    pub lambda: f32,
    pub eta: f32,
    pub rmse: f64,
}

/// Evaluate every grid combination with `nr_folds`-fold cross-validation.
///
/// Combinations whose RMSE comes back non-finite (divergence at a high
/// learning rate, typically) are dropped from the ranking. Returns results
/// sorted best-first; fails with `InvalidInput` when nothing finite remains.
pub fn tune(
    prob: &Problem,
    grid: &TuneGrid,
    nr_folds: u32,
    base: &TrainParams,
) -> Result<Vec<TuneResult>> {
    if grid.k.is_empty() || grid.lambda.is_empty() || grid.eta.is_empty() {
        return Err(Error::invalid("tune grid is empty"));
    }

    let mut results = Vec::with_capacity(grid.k.len() * grid.lambda.len() * grid.eta.len());
    for &k in &grid.k {
        for &lambda in &grid.lambda {
            for &eta in &grid.eta {
                let params = TrainParams {
                    k,
                    lambda,
                    eta,
                    quiet: true,
                    ..base.clone()
                };
                let cv = cross_validate(prob, nr_folds, &params)?;
                if cv.rmse.is_finite() {
                    results.push(TuneResult {
                        k,
                        lambda,
                        eta,
                        rmse: cv.rmse,
                    });
                } else {
                    log::debug!(
                        "dropping non-finite result for k={k} lambda={lambda} eta={eta}"
                    );
                }
            }
        }
    }

    if results.is_empty() {
        return Err(Error::invalid("no finite results"));
    }
    results.sort_by(|a, b| a.rmse.total_cmp(&b.rmse));
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Rating;
    use crate::rng::FactorRng;

    fn random_problem(m: u32, n: u32, nnz: usize) -> Problem {
        let mut rng = FactorRng::seed_from_u64(55);
        let ratings = (0..nnz)
            .map(|_| Rating {
                u: (rng.next_f32() * m as f32) as u32 % m,
                v: (rng.next_f32() * n as f32) as u32 % n,
                r: 1.0 + 4.0 * rng.next_f32(),
            })
            .collect();
        Problem::new(m, n, ratings).unwrap()
    }

    #[test]
    fn test_tune_ranks_best_first() {
        let prob = random_problem(15, 15, 300);
        let grid = TuneGrid {
            k: vec![4],
            lambda: vec![0.05, 0.5],
            eta: vec![0.1],
        };
        let base = TrainParams {
            nr_iters: 4,
            nr_bins: 4,
            quiet: true,
            ..Default::default()
        };
        let results = tune(&prob, &grid, 2, &base).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].rmse <= results[1].rmse);
    }

    #[test]
    fn test_tune_rejects_empty_grid() {
        let prob = random_problem(10, 10, 100);
        let grid = TuneGrid {
            k: vec![],
            lambda: vec![0.1],
            eta: vec![0.1],
        };
        let base = TrainParams::default();
        assert!(tune(&prob, &grid, 2, &base).is_err());
    }
}
