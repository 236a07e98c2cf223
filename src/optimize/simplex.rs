use argmin::{
    core::{CostFunction, Error, Executor},
    solver::neldermead::NelderMead,
};

use crate::optimize::{FitContext, FitError};

struct SimplexProblem<'a> {
    context: &'a FitContext,
}

impl CostFunction for SimplexProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, point: &Self::Param) -> Result<Self::Output, Error> {
        self.context
            .cost(point)
            .map_err(|e| Error::msg(e.to_string()))
    }
}

/// Derivative-free polish of a point estimate.
///
/// Used when the Levenberg–Marquardt normal matrix is singular and no
/// curvature information is available: a small Nelder–Mead simplex around
/// the current estimate still improves the point itself, while the
/// confidence intervals stay unavailable.
pub(crate) fn polish(context: &FitContext, start: &[f64]) -> Result<Vec<f64>, FitError> {
    let simplex = create_initial_simplex(start);
    let solver: NelderMead<Vec<f64>, f64> = NelderMead::new(simplex)
        .with_sd_tolerance(1e-6)
        .map_err(|e| FitError::Simplex(e.to_string()))?;
    let result = Executor::new(SimplexProblem { context }, solver)
        .configure(|state| state.max_iters(200))
        .run()
        .map_err(|e| FitError::Simplex(e.to_string()))?;
    Ok(result
        .state
        .best_param
        .unwrap_or_else(|| start.to_vec()))
}

fn create_initial_simplex(initial_point: &[f64]) -> Vec<Vec<f64>> {
    let num_dimensions = initial_point.len();
    let perturbation_percentage = 0.008;

    let mut vertices = Vec::new();
    vertices.push(initial_point.to_vec());

    for i in 0..num_dimensions {
        let perturbation = if initial_point[i] == 0.0 {
            0.00025 // Special case for components equal to 0
        } else {
            perturbation_percentage * initial_point[i]
        };

        let mut perturbed_point = initial_point.to_vec();
        perturbed_point[i] += perturbation;
        vertices.push(perturbed_point);
    }

    vertices
}
