use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::optimize::result::ConfidenceInterval;
use crate::optimize::statistics::{evaluate_quality, FitQuality};
use crate::optimize::{local, Deadline, FitContext, FitError, LmOptions};

/// Options for bootstrap resampling
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Number of bootstrap realizations
    pub n_resamples: usize,
    /// Base seed; iteration `i` uses `seed + i`, so a fixed seed
    /// reproduces the full matrix regardless of thread scheduling
    pub seed: u64,
    /// Show a progress bar
    pub progress: bool,
    pub lm: LmOptions,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        BootstrapOptions {
            n_resamples: 200,
            seed: 0,
            progress: false,
            lm: LmOptions::default(),
        }
    }
}

/// A bootstrap parameter population: one refitted parameter vector per
/// resample, in iteration order.
///
/// Downstream consumers draw percentile-based confidence bands from the
/// matrix or sample individual rows to simulate population variability.
/// Each row's quality statistics are evaluated against the full,
/// unresampled dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapFit {
    parameter_names: Vec<String>,
    rows: Vec<Vec<f64>>,
    quality: Vec<FitQuality>,
}

impl BootstrapFit {
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    /// Number of resamples
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parameter vector of resample `i`
    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }

    /// Per-resample quality against the full dataset
    pub fn quality(&self) -> &[FitQuality] {
        &self.quality
    }

    /// The (resamples × parameters) matrix
    pub fn matrix(&self) -> Array2<f64> {
        let n = self.rows.len();
        let p = self.parameter_names.len();
        Array2::from_shape_fn((n, p), |(i, j)| self.rows[i][j])
    }

    /// Column means
    pub fn mean(&self) -> Vec<f64> {
        let matrix = self.matrix();
        matrix
            .columns()
            .into_iter()
            .map(|column| column.mean().unwrap_or(0.0))
            .collect()
    }

    /// Column standard deviations (population)
    pub fn std(&self) -> Vec<f64> {
        let matrix = self.matrix();
        matrix
            .columns()
            .into_iter()
            .map(|column| column.std(0.0))
            .collect()
    }

    /// Percentile confidence interval per parameter at the given level
    /// (in percent).
    pub fn percentile_intervals(&self, level: f64) -> Vec<ConfidenceInterval> {
        let alpha = (1.0 - level / 100.0) / 2.0;
        let matrix = self.matrix();
        matrix
            .columns()
            .into_iter()
            .map(|column| {
                let mut values: Vec<f64> = column.to_vec();
                values.sort_by(|a, b| a.partial_cmp(b).unwrap());
                ConfidenceInterval {
                    lower: percentile(&values, alpha),
                    upper: percentile(&values, 1.0 - alpha),
                }
            })
            .collect()
    }

    /// Draw a random parameter vector from the population
    pub fn sample_row(&self, rng: &mut impl Rng) -> &[f64] {
        &self.rows[rng.random_range(0..self.rows.len())]
    }
}

/// Linear-interpolated percentile of a sorted slice
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = position - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Bootstrap the local stage.
///
/// For each of `n_resamples` iterations: draw observation indices with
/// replacement (sorted, so the resample keeps the monotone time axis the
/// integrator relies on), refit with Levenberg–Marquardt seeded from
/// `point`, and record the refitted parameter vector. Iterations run in
/// parallel and share nothing mutable (each builds its own context), and
/// results are ordered by iteration index, not completion order.
pub fn bootstrap_fit(
    context: &FitContext,
    point: &[f64],
    options: &BootstrapOptions,
) -> Result<BootstrapFit, FitError> {
    let (x, y) = context.observations();
    let n_obs = x.len();
    if n_obs == 0 {
        return Err(FitError::EmptySample);
    }

    let bar = if options.progress {
        let bar = ProgressBar::new(options.n_resamples as u64);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message("bootstrap");
        bar
    } else {
        ProgressBar::hidden()
    };

    let rows: Vec<Result<(Vec<f64>, FitQuality), FitError>> = (0..options.n_resamples)
        .into_par_iter()
        .map(|iteration| {
            let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(iteration as u64));
            let mut indices: Vec<usize> =
                (0..n_obs).map(|_| rng.random_range(0..n_obs)).collect();
            indices.sort_unstable();

            let xb: Vec<f64> = indices.iter().map(|&i| x[i]).collect();
            let yb: Vec<f64> = indices.iter().map(|&i| y[i]).collect();
            let resampled = context.with_observations(xb, yb);

            let outcome = local::minimize(&resampled, point, &options.lm, &Deadline::new(None))?;

            // Quality is judged against the full dataset, not the
            // resample, to avoid optimistic bias
            let predicted = context.predict(&outcome.parameters)?;
            let quality = evaluate_quality(y, &predicted, point.len());

            bar.inc(1);
            Ok((outcome.parameters, quality))
        })
        .collect();
    bar.finish_and_clear();

    let mut parameter_rows = Vec::with_capacity(options.n_resamples);
    let mut quality = Vec::with_capacity(options.n_resamples);
    for row in rows {
        let (parameters, row_quality) = row?;
        parameter_rows.push(parameters);
        quality.push(row_quality);
    }

    Ok(BootstrapFit {
        parameter_names: context.parameter_names(),
        rows: parameter_rows,
        quality,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sample;
    use crate::optimize::Loss;
    use crate::simulator::{OdeGrid, OneCompartment};

    fn noise_free_context() -> FitContext {
        let (cl, v) = (0.1, 20.0);
        let ke: f64 = cl / v;
        let mut builder = Sample::builder("s1")
            .dose("Dose1; iv; bolus t=0 d=100; min; mg")
            .unwrap();
        for &t in &[5.0, 30.0, 60.0, 120.0, 240.0, 480.0] {
            builder = builder.observation(t, 100.0 / v * (-ke * t).exp());
        }
        FitContext::new(
            builder.build(),
            Box::new(OneCompartment::new(0.0, 1.0)),
            OdeGrid::new(0.0, 500.0, 0.5),
            "(0.001,10);(0.1,500)",
            Loss::Linear,
        )
        .unwrap()
    }

    #[test]
    fn test_noise_free_bootstrap_has_negligible_spread() {
        let context = noise_free_context();
        let options = BootstrapOptions {
            n_resamples: 50,
            ..Default::default()
        };
        let fit = bootstrap_fit(&context, &[0.1, 20.0], &options).unwrap();
        assert_eq!(fit.len(), 50);
        for (std, mean) in fit.std().iter().zip(fit.mean()) {
            assert!(std / mean.abs().max(1e-12) < 1e-3, "spread too large");
        }
    }

    #[test]
    fn test_bootstrap_is_reproducible_for_a_seed() {
        let context = noise_free_context();
        let options = BootstrapOptions {
            n_resamples: 10,
            seed: 99,
            ..Default::default()
        };
        let a = bootstrap_fit(&context, &[0.12, 22.0], &options).unwrap();
        let b = bootstrap_fit(&context, &[0.12, 22.0], &options).unwrap();
        for i in 0..a.len() {
            assert_eq!(a.row(i), b.row(i));
        }
    }

    #[test]
    fn test_percentile_helper() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((percentile(&sorted, 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(&sorted, 1.0) - 5.0).abs() < 1e-12);
        assert!((percentile(&sorted, 0.5) - 3.0).abs() < 1e-12);
    }
}
