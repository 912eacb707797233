//! Prediction over a trained model.
//!
//! [`Predictor`] is a read-only view: it borrows the model and can be shared
//! freely across threads. Beyond single lookups it drives the streaming
//! sink, one predicted float per input line.

use std::io::{BufRead, Write};

use crate::error::{Error, Result};
use crate::model::Model;

/// Read-only prediction interface over a trained [`Model`].
#[derive(Debug, Clone, Copy)]
pub struct Predictor<'a> {
    model: &'a Model,
}

/// Totals from a [`Predictor::predict_stream`] run.
#[derive(Debug, Clone, Copy)]
pub struct PredictSummary {
    /// Number of predictions emitted.
    pub count: u64,
    /// RMSE against the observed ratings, when every input line carried one.
    pub rmse: Option<f64>,
}

impl<'a> Predictor<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self { model }
    }

    /// Predicted rating for `(u, v)`; `0.0` when either index is out of
    /// range.
    #[inline]
    pub fn predict(&self, u: u32, v: u32) -> f32 {
        self.model.predict(u, v)
    }

    /// Read `u v [r]` lines from `input` and write one prediction per line
    /// to `output`, in input order.
    ///
    /// When every line carries an observed rating the summary includes the
    /// RMSE of the predictions against them.
    pub fn predict_stream(
        &self,
        input: impl BufRead,
        mut output: impl Write,
    ) -> Result<PredictSummary> {
        let mut count = 0u64;
        let mut sq_err = 0.0f64;
        let mut all_rated = true;

        for (lineno, line) in input.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let parsed = (|| {
                let u: u32 = fields.next()?.parse().ok()?;
                let v: u32 = fields.next()?.parse().ok()?;
                let r: Option<f32> = match fields.next() {
                    Some(f) => Some(f.parse().ok()?),
                    None => None,
                };
                Some((u, v, r))
            })();
            let (u, v, r) = parsed.ok_or_else(|| {
                Error::invalid(format!(
                    "line {}: expected `u v [r]`, got {:?}",
                    lineno + 1,
                    line
                ))
            })?;

            let pred = self.predict(u, v);
            writeln!(output, "{pred}")?;
            count += 1;
            match r {
                Some(r) => sq_err += (pred as f64 - r as f64).powi(2),
                None => all_rated = false,
            }
        }

        let rmse = (all_rated && count > 0).then(|| (sq_err / count as f64).sqrt());
        Ok(PredictSummary { count, rmse })
    }
}
