//! Parameter estimation: a two-stage global/local search over a
//! [`FitContext`].
//!
//! Stage one is a differential-evolution population search over the declared
//! parameter bounds; stage two refines the best candidate with a
//! Levenberg–Marquardt least-squares iteration and derives per-parameter
//! confidence intervals from the Jacobian at convergence. A bootstrap
//! variant repeats stage two over index-resampled observations.
//!
//! All state needed by an evaluation lives in the context object (sample
//! arrays, drug source, model, bounds, loss), and every evaluation works on
//! its own copies of the mutable pieces, so bootstrap iterations can run in
//! parallel without shared state.

pub mod bootstrap;
pub mod global;
pub mod local;
pub mod result;
pub mod simplex;
pub mod statistics;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

use crate::data::dose::{Dose, DoseError};
use crate::data::expression::ExpressionError;
use crate::data::units::Unit;
use crate::data::{DrugSource, Sample};
use crate::simulator::{simulate, CompartmentModel, OdeGrid, SimulationError};
use crate::{Parametric, Significance};

pub use bootstrap::{bootstrap_fit, BootstrapFit, BootstrapOptions};
pub use global::DeOptions;
pub use local::LmOptions;
pub use result::{ConfidenceInterval, FitResult, FittedParameter, PredictedCurve};
pub use statistics::{evaluate_quality, FitQuality};

/// Residual value standing in for an out-of-bounds or non-finite
/// evaluation during the search.
pub(crate) const PENALTY: f64 = 1e38;

/// Envelope simulation enumerates every corner of the confidence box;
/// above this many parameters the enumeration is skipped.
const MAX_ENVELOPE_PARAMS: usize = 12;

/// Error type for parameter estimation
#[derive(Error, Debug)]
pub enum FitError {
    #[error("Malformed bounds specification '{spec}': {reason}")]
    BoundsParse { spec: String, reason: String },
    #[error("The number of bound intervals ({bounds}) does not match the number of free parameters ({parameters})")]
    BoundsMismatch { bounds: usize, parameters: usize },
    #[error("The number of unit tags ({units}) does not match the number of free parameters ({parameters})")]
    UnitsMismatch { units: usize, parameters: usize },
    #[error("Sample has no finite observations to fit")]
    EmptySample,
    #[error("Converged parameters violate the model's validity domain")]
    InvalidOptimum,
    #[error("Degenerate fit: {reason}")]
    Degenerate { reason: String },
    #[error("Fit deadline of {0:.1?} exceeded")]
    Timeout(Duration),
    #[error("Simplex polish failed: {0}")]
    Simplex(String),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Dose(#[from] DoseError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

/// Residual definition minimized by both optimizer stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Loss {
    /// Plain residuals `y - f(x)`
    #[default]
    Linear,
    /// Residuals of decimal logarithms; observations must be positive
    Log10,
    /// Residuals relative to the observation, `(y - f(x)) / y`
    Relative,
}

/// Parse a bounds specification: a semicolon-separated list of `(low,high)`
/// pairs, one per free parameter, in the declared order (dose parameters,
/// then absorption parameters, then compartmental-model parameters).
pub fn parse_bounds(spec: &str) -> Result<Vec<(f64, f64)>, FitError> {
    let fail = |reason: &str| FitError::BoundsParse {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = spec.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut bounds = Vec::new();
    for token in trimmed.split(';') {
        let token = token.trim();
        let inner = token
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .ok_or_else(|| fail("each interval must be parenthesized"))?;
        let (low, high) = inner
            .split_once(',')
            .ok_or_else(|| fail("each interval needs two comma-separated values"))?;
        let low: f64 = low.trim().parse().map_err(|_| fail("invalid lower bound"))?;
        let high: f64 = high
            .trim()
            .parse()
            .map_err(|_| fail("invalid upper bound"))?;
        if low > high {
            return Err(fail("lower bound exceeds upper bound"));
        }
        bounds.push((low, high));
    }
    Ok(bounds)
}

/// Everything one fit needs, threaded explicitly through the optimizer
/// stages.
///
/// The context owns the observation arrays (filtered to finite,
/// loss-compatible entries), the drug source built from the sample's dosing
/// schedule, the compartmental model, and the parsed bounds split between
/// source and model parameters. Constructing a context validates the bounds
/// count against the free-parameter count before any optimization work
/// begins.
#[derive(Clone)]
pub struct FitContext {
    sample: Sample,
    source: DrugSource,
    model: Box<dyn CompartmentModel>,
    grid: OdeGrid,
    bounds: Vec<(f64, f64)>,
    n_source_params: usize,
    loss: Loss,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl FitContext {
    pub fn new(
        sample: Sample,
        model: Box<dyn CompartmentModel>,
        grid: OdeGrid,
        bounds_spec: &str,
        loss: Loss,
    ) -> Result<Self, FitError> {
        let doses: Vec<Dose> = sample.interpret_doses()?;
        let source = DrugSource::for_doses(&doses, grid.t0, grid.t_end);
        let bounds = parse_bounds(bounds_spec)?;

        let n_source_params = source.parameter_names().len();
        let n_params = n_source_params + model.parameter_names().len();
        if bounds.len() != n_params {
            return Err(FitError::BoundsMismatch {
                bounds: bounds.len(),
                parameters: n_params,
            });
        }

        // Keep only observations the loss can work with
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (&t, &value) in sample.predictor().iter().zip(sample.response()) {
            if value.is_finite() && (loss != Loss::Log10 || value > 0.0) {
                x.push(t);
                y.push(value);
            }
        }
        if x.is_empty() {
            return Err(FitError::EmptySample);
        }

        Ok(FitContext {
            sample,
            source,
            model,
            grid,
            bounds,
            n_source_params,
            loss,
            x,
            y,
        })
    }

    /// Full ordered parameter names: drug source first, then model
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names = self.source.parameter_names();
        names.extend(self.model.parameter_names());
        names
    }

    /// Unit tags in parameter order
    pub fn parameter_units(&self) -> Vec<Unit> {
        let mut units = self.source.parameter_units();
        units.extend(self.model.parameter_units());
        units
    }

    /// Check a display units specification against the free parameters.
    pub fn check_units_spec(&self, spec: &str) -> Result<Vec<Unit>, FitError> {
        let units = crate::data::units::parse_units_spec(spec)?;
        let expected = self.parameter_names().len();
        if units.len() != expected {
            return Err(FitError::UnitsMismatch {
                units: units.len(),
                parameters: expected,
            });
        }
        Ok(units)
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    pub fn grid(&self) -> &OdeGrid {
        &self.grid
    }

    /// Number of (usable) observations
    pub fn n_observations(&self) -> usize {
        self.x.len()
    }

    pub fn n_parameters(&self) -> usize {
        self.bounds.len()
    }

    pub(crate) fn observations(&self) -> (&[f64], &[f64]) {
        (&self.x, &self.y)
    }

    /// The same context fitting a resampled copy of the sample. The drug
    /// source and model are cloned, so the new context shares no mutable
    /// state with `self`.
    pub(crate) fn with_observations(&self, x: Vec<f64>, y: Vec<f64>) -> FitContext {
        let mut resampled = self.clone();
        resampled.x = x;
        resampled.y = y;
        resampled
    }

    pub(crate) fn in_bounds(&self, p: &[f64]) -> bool {
        p.len() == self.bounds.len()
            && p.iter()
                .zip(&self.bounds)
                .all(|(&v, &(lo, hi))| lo <= v && v <= hi)
    }

    /// Validity predicate over the whole parameter vector
    pub fn are_parameters_valid(&self, p: &[f64]) -> bool {
        self.source.are_parameters_valid(&p[..self.n_source_params])
            && self.model.are_parameters_valid(&p[self.n_source_params..])
    }

    pub(crate) fn are_parameters_significant(
        &self,
        lower: &[f64],
        upper: &[f64],
    ) -> Vec<Significance> {
        let split = self.n_source_params;
        let mut result = self
            .source
            .are_parameters_significant(&lower[..split], &upper[..split]);
        result.extend(
            self.model
                .are_parameters_significant(&lower[split..], &upper[split..]),
        );
        result
    }

    /// Simulate with the given parameter vector and return predictions at
    /// arbitrary times.
    pub fn predict_at(&self, p: &[f64], times: &[f64]) -> Result<Vec<f64>, FitError> {
        let mut source = self.source.clone();
        source.set_parameters(&p[..self.n_source_params]);
        let mut model = self.model.clone();
        model.set_parameters(&p[self.n_source_params..]);
        let sim = simulate(model.as_ref(), &source, &self.grid)?;
        Ok(sim.predict_at(times))
    }

    /// Predictions at the sample's (usable) observation times
    pub fn predict(&self, p: &[f64]) -> Result<Vec<f64>, FitError> {
        self.predict_at(p, &self.x)
    }

    /// Residual vector under the configured loss. Out-of-bounds or invalid
    /// candidates yield a penalty vector instead of a crash; individual
    /// non-finite entries are replaced by the penalty value.
    pub(crate) fn residuals(&self, p: &[f64]) -> Result<Vec<f64>, FitError> {
        if !self.in_bounds(p) || !self.are_parameters_valid(p) {
            return Ok(vec![PENALTY; self.y.len()]);
        }
        let predicted = self.predict(p)?;
        let residuals = self
            .y
            .iter()
            .zip(&predicted)
            .map(|(&y, &yp)| {
                let diff = match self.loss {
                    Loss::Linear => y - yp,
                    Loss::Log10 => {
                        // Floor tiny or negative predictions the way the
                        // log residual must: the observation is known > 0
                        let yp_log = if yp.is_finite() && yp >= 1e-20 {
                            yp.log10()
                        } else {
                            -100.0
                        };
                        y.log10() - yp_log
                    }
                    Loss::Relative => (y - yp) / y,
                };
                if diff.is_finite() {
                    diff
                } else {
                    PENALTY
                }
            })
            .collect();
        Ok(residuals)
    }

    /// Root-mean-square of the residuals: the scalar goal for the global
    /// stage and the simplex polish.
    pub(crate) fn cost(&self, p: &[f64]) -> Result<f64, FitError> {
        let residuals = self.residuals(p)?;
        let mean_square =
            residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64;
        Ok(mean_square.sqrt())
    }
}

/// Options steering one fit
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Run the global differential-evolution stage before local refinement
    pub global_search: bool,
    /// Confidence level for parameter intervals, in percent
    pub confidence_level: f64,
    /// Seed for the global stage's random number generator
    pub seed: u64,
    /// Optional wall-clock deadline; exceeding it aborts with
    /// [`FitError::Timeout`]
    pub deadline: Option<Duration>,
    pub de: DeOptions,
    pub lm: LmOptions,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            global_search: true,
            confidence_level: 95.0,
            seed: 0,
            deadline: None,
            de: DeOptions::default(),
            lm: LmOptions::default(),
        }
    }
}

pub(crate) struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    fn new(limit: Option<Duration>) -> Self {
        Deadline {
            started: Instant::now(),
            limit,
        }
    }

    pub(crate) fn check(&self) -> Result<(), FitError> {
        match self.limit {
            Some(limit) if self.started.elapsed() > limit => Err(FitError::Timeout(limit)),
            _ => Ok(()),
        }
    }
}

/// Run the two-stage fit.
///
/// The global stage seeds the local stage; with `global_search` off the
/// seed is the bounds midpoint (useful when refitting from a known
/// estimate). Confidence intervals use the Student-t quantile with `n - p`
/// degrees of freedom on the covariance from the Jacobian at convergence.
/// Failure of the local stage to converge within its iteration budget is
/// reported through [`FitResult::converged`], not as an error.
pub fn fit(context: &FitContext, options: &FitOptions) -> Result<FitResult, FitError> {
    let deadline = Deadline::new(options.deadline);

    let initial = if options.global_search {
        global::minimize(context, &options.de, options.seed, &deadline)?
    } else {
        context
            .bounds()
            .iter()
            .map(|&(lo, hi)| 0.5 * (lo + hi))
            .collect()
    };
    tracing::debug!(?initial, "global stage finished");

    let outcome = local::minimize(context, &initial, &options.lm, &deadline)?;
    tracing::debug!(
        rss = outcome.rss,
        converged = outcome.converged,
        "local stage finished"
    );

    let mut best = outcome.parameters.clone();
    if outcome.covariance.is_none() {
        // A singular Jacobian leaves no usable curvature; polish the point
        // estimate with a derivative-free simplex instead.
        best = simplex::polish(context, &best)?;
    }

    if !context.are_parameters_valid(&best) {
        return Err(FitError::InvalidOptimum);
    }

    build_result(context, &best, &outcome, options)
}

fn build_result(
    context: &FitContext,
    best: &[f64],
    outcome: &local::LmOutcome,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    let (x, y) = context.observations();
    let predicted = context.predict(best)?;
    if predicted.iter().any(|v| !v.is_finite()) {
        return Err(FitError::Degenerate {
            reason: "non-finite prediction at the converged optimum".to_string(),
        });
    }

    let n = y.len();
    let p = best.len();
    let quality = evaluate_quality(y, &predicted, p);

    // Student-t confidence intervals from the covariance diagonal
    let mut intervals: Option<(Vec<f64>, Vec<f64>)> = None;
    if let Some(covariance) = &outcome.covariance {
        if n > p {
            let dof = (n - p) as f64;
            let alpha = 1.0 - options.confidence_level / 100.0;
            let t = StudentsT::new(0.0, 1.0, dof)
                .map_err(|e| FitError::Degenerate {
                    reason: format!("confidence quantile unavailable: {}", e),
                })?
                .inverse_cdf(1.0 - alpha / 2.0);
            let mut lower = Vec::with_capacity(p);
            let mut upper = Vec::with_capacity(p);
            for j in 0..p {
                let se = covariance[(j, j)].max(0.0).sqrt();
                lower.push(best[j] - t * se);
                upper.push(best[j] + t * se);
            }
            intervals = Some((lower, upper));
        }
    }

    let significance = match &intervals {
        Some((lower, upper)) => context.are_parameters_significant(lower, upper),
        None => vec![Significance::Undetermined; p],
    };

    let parameters: Vec<FittedParameter> = context
        .parameter_names()
        .into_iter()
        .zip(context.parameter_units())
        .enumerate()
        .map(|(j, (name, unit))| FittedParameter {
            name,
            unit,
            value: best[j],
            interval: intervals.as_ref().map(|(lower, upper)| ConfidenceInterval {
                lower: lower[j],
                upper: upper[j],
            }),
            significance: significance[j],
        })
        .collect();

    let (curve_lower, curve_upper) = match &intervals {
        Some((lower, upper)) if p <= MAX_ENVELOPE_PARAMS => {
            let envelope = simulate_envelope(context, &predicted, lower, upper)?;
            (Some(envelope.0), Some(envelope.1))
        }
        _ => (None, None),
    };

    Ok(FitResult {
        parameters,
        curve: PredictedCurve {
            times: x.to_vec(),
            predicted,
            lower: curve_lower,
            upper: curve_upper,
        },
        quality,
        converged: outcome.converged,
        model_equation: context.model.model_equation(),
    })
}

/// Pointwise envelope of the predictions over every corner of the
/// per-parameter confidence box. Invalid corners are skipped; the lower
/// envelope is clamped at zero (a negative concentration band is
/// meaningless).
fn simulate_envelope(
    context: &FitContext,
    predicted: &[f64],
    lower: &[f64],
    upper: &[f64],
) -> Result<(Vec<f64>, Vec<f64>), FitError> {
    let p = lower.len();
    let mut band_lower = predicted.to_vec();
    let mut band_upper = predicted.to_vec();

    for corner in 0..(1usize << p) {
        let point: Vec<f64> = (0..p)
            .map(|j| {
                if corner & (1 << j) != 0 {
                    upper[j]
                } else {
                    lower[j]
                }
            })
            .collect();
        if !context.are_parameters_valid(&point) {
            continue;
        }
        let y = context.predict(&point)?;
        for (i, &value) in y.iter().enumerate() {
            if value.is_finite() {
                band_lower[i] = band_lower[i].min(value).max(0.0);
                band_upper[i] = band_upper[i].max(value);
            }
        }
    }
    Ok((band_lower, band_upper))
}
