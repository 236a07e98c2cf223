use nalgebra::{DMatrix, DVector};

use crate::optimize::{Deadline, FitContext, FitError, PENALTY};

/// Options for the Levenberg–Marquardt local stage
#[derive(Debug, Clone)]
pub struct LmOptions {
    pub max_iterations: usize,
    /// Relative decrease of the residual sum of squares below which the
    /// iteration stops
    pub ftol: f64,
    /// Relative step norm below which the iteration stops
    pub xtol: f64,
    /// Relative forward-difference step for the numerical Jacobian
    pub jacobian_step: f64,
    /// Initial damping factor
    pub lambda0: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        LmOptions {
            max_iterations: 100,
            ftol: 1e-10,
            xtol: 1e-10,
            jacobian_step: 1e-6,
            lambda0: 1e-3,
        }
    }
}

/// Outcome of the local stage.
///
/// `covariance` is the parameter covariance `(JᵀJ)⁻¹ · s²` with
/// `s² = RSS/(n−p)`, evaluated at the converged point; `None` when the
/// normal matrix is singular (at least one parameter does not influence the
/// residuals independently).
#[derive(Debug, Clone)]
pub struct LmOutcome {
    pub parameters: Vec<f64>,
    pub covariance: Option<DMatrix<f64>>,
    pub rss: f64,
    pub converged: bool,
    pub iterations: usize,
}

fn sum_of_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// Damped least squares from a feasible starting point.
///
/// Each iteration builds a forward-difference Jacobian of the prediction,
/// solves the damped normal equations and accepts the step only when the
/// residual sum of squares improves, growing the damping tenfold otherwise.
/// Steps are therefore monotone in RSS; failure to reach the tolerance
/// within the iteration budget is reported through `converged`, not as an
/// error.
pub(crate) fn minimize(
    context: &FitContext,
    start: &[f64],
    options: &LmOptions,
    deadline: &Deadline,
) -> Result<LmOutcome, FitError> {
    let p_dim = start.len();
    let mut parameters = start.to_vec();
    let mut residuals = context.residuals(&parameters)?;
    if residuals.iter().any(|&r| r == PENALTY) {
        return Err(FitError::Degenerate {
            reason: "local stage started from an infeasible point".to_string(),
        });
    }
    let n = residuals.len();
    let mut rss = sum_of_squares(&residuals);
    let mut lambda = options.lambda0;
    let mut converged = false;
    let mut iterations = 0;
    let mut jtj = DMatrix::<f64>::zeros(p_dim, p_dim);

    for iteration in 0..options.max_iterations {
        deadline.check()?;
        iterations = iteration + 1;

        let jacobian = jacobian(context, &parameters, &residuals, options)?;
        jtj = &jacobian.transpose() * &jacobian;
        // Residuals are y - f, so the descent direction needs -Jᵀr of the
        // prediction Jacobian; `jacobian` here is ∂r/∂p already.
        let gradient = &jacobian.transpose() * DVector::from_column_slice(&residuals);

        let mut step_accepted = false;
        for _ in 0..16 {
            let mut damped = jtj.clone();
            for j in 0..p_dim {
                damped[(j, j)] += lambda * jtj[(j, j)].max(1e-12);
            }
            let delta = match damped.lu().solve(&(-&gradient)) {
                Some(delta) => delta,
                None => break,
            };

            let trial: Vec<f64> = parameters
                .iter()
                .zip(delta.iter())
                .map(|(&p, &d)| p + d)
                .collect();
            let trial_residuals = context.residuals(&trial)?;
            let trial_rss = sum_of_squares(&trial_residuals);

            if trial_rss < rss {
                let step_norm = delta.norm();
                let improvement = rss - trial_rss;
                parameters = trial;
                residuals = trial_residuals;
                rss = trial_rss;
                lambda = (lambda / 10.0).max(1e-12);
                step_accepted = true;

                let param_norm = parameters.iter().map(|p| p * p).sum::<f64>().sqrt();
                if improvement <= options.ftol * rss.max(1e-300)
                    || step_norm <= options.xtol * (param_norm + options.xtol)
                {
                    converged = true;
                }
                break;
            }
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }

        if converged {
            break;
        }
        if !step_accepted {
            // No damping level produced an improving step: a (possibly
            // local) optimum within numerical resolution
            converged = true;
            break;
        }
    }

    tracing::debug!(iterations, rss, converged, "levenberg-marquardt done");

    let covariance = if n > p_dim {
        jtj.clone().try_inverse().map(|inverse| {
            let s2 = rss / (n - p_dim) as f64;
            inverse * s2
        })
    } else {
        None
    };

    Ok(LmOutcome {
        parameters,
        covariance,
        rss,
        converged,
        iterations,
    })
}

/// Forward-difference Jacobian of the residual vector
fn jacobian(
    context: &FitContext,
    parameters: &[f64],
    residuals: &[f64],
    options: &LmOptions,
) -> Result<DMatrix<f64>, FitError> {
    let n = residuals.len();
    let p_dim = parameters.len();
    let mut matrix = DMatrix::<f64>::zeros(n, p_dim);

    for j in 0..p_dim {
        let step = options.jacobian_step * parameters[j].abs().max(1e-8);
        let mut perturbed = parameters.to_vec();
        perturbed[j] += step;
        let perturbed_residuals = context.residuals(&perturbed)?;
        for i in 0..n {
            matrix[(i, j)] = (perturbed_residuals[i] - residuals[i]) / step;
        }
    }
    Ok(matrix)
}
