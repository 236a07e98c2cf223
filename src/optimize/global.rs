use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::optimize::{Deadline, FitContext, FitError};

/// Options for the differential-evolution global stage
#[derive(Debug, Clone)]
pub struct DeOptions {
    /// Population size as a multiple of the parameter count
    pub population_multiplier: usize,
    pub max_generations: usize,
    /// Crossover probability
    pub crossover: f64,
    /// Mutation factor is dithered per generation inside this range
    pub mutation: (f64, f64),
    /// Convergence tolerance on the population cost spread
    pub tol: f64,
}

impl Default for DeOptions {
    fn default() -> Self {
        DeOptions {
            population_multiplier: 15,
            max_generations: 300,
            crossover: 0.7,
            mutation: (0.5, 1.0),
            tol: 0.01,
        }
    }
}

/// Differential evolution (best/1/bin) over the declared bounds.
///
/// The search never evaluates the model outside the bounds box: mutants are
/// clipped back, and candidates failing the model's validity predicate are
/// rejected through an infinite cost rather than crashing the evaluation.
/// The run is deterministic for a fixed seed.
pub(crate) fn minimize(
    context: &FitContext,
    options: &DeOptions,
    seed: u64,
    deadline: &Deadline,
) -> Result<Vec<f64>, FitError> {
    let bounds = context.bounds();
    let dim = bounds.len();
    let pop_size = (options.population_multiplier * dim).max(5);
    let mut rng = StdRng::seed_from_u64(seed);

    let evaluate = |p: &[f64]| -> Result<f64, FitError> {
        if !context.are_parameters_valid(p) {
            return Ok(f64::INFINITY);
        }
        let cost = context.cost(p)?;
        Ok(if cost.is_finite() { cost } else { f64::INFINITY })
    };

    // Uniform random initialization inside the bounds box
    let mut population: Vec<Vec<f64>> = (0..pop_size)
        .map(|_| {
            bounds
                .iter()
                .map(|&(lo, hi)| rng.random_range(lo..=hi))
                .collect()
        })
        .collect();
    let mut costs: Vec<f64> = population
        .iter()
        .map(|member| evaluate(member))
        .collect::<Result<_, _>>()?;

    let mut best_index = argmin_index(&costs);

    for generation in 0..options.max_generations {
        deadline.check()?;

        let factor = rng.random_range(options.mutation.0..options.mutation.1);
        for i in 0..pop_size {
            // Two distinct donors, both different from the target
            let (a, b) = {
                let mut a = rng.random_range(0..pop_size);
                while a == i {
                    a = rng.random_range(0..pop_size);
                }
                let mut b = rng.random_range(0..pop_size);
                while b == i || b == a {
                    b = rng.random_range(0..pop_size);
                }
                (a, b)
            };

            let forced = rng.random_range(0..dim);
            let mut trial = population[i].clone();
            for j in 0..dim {
                if j == forced || rng.random_range(0.0..1.0) < options.crossover {
                    let mutant =
                        population[best_index][j] + factor * (population[a][j] - population[b][j]);
                    trial[j] = mutant.clamp(bounds[j].0, bounds[j].1);
                }
            }

            let trial_cost = evaluate(&trial)?;
            if trial_cost <= costs[i] {
                population[i] = trial;
                costs[i] = trial_cost;
                if trial_cost < costs[best_index] {
                    best_index = i;
                }
            }
        }

        if converged(&costs, options.tol) {
            tracing::debug!(generation, best = costs[best_index], "population converged");
            break;
        }
    }

    if !costs[best_index].is_finite() {
        return Err(FitError::Degenerate {
            reason: "global search found no feasible candidate".to_string(),
        });
    }
    Ok(population[best_index].clone())
}

fn argmin_index(costs: &[f64]) -> usize {
    let mut best = 0;
    for (i, &cost) in costs.iter().enumerate() {
        if cost < costs[best] {
            best = i;
        }
    }
    best
}

/// Population spread criterion: the standard deviation of the finite costs
/// has shrunk below `tol` times their mean magnitude.
fn converged(costs: &[f64], tol: f64) -> bool {
    let finite: Vec<f64> = costs.iter().copied().filter(|c| c.is_finite()).collect();
    if finite.len() < costs.len() || finite.is_empty() {
        return false;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let var = finite.iter().map(|c| (c - mean) * (c - mean)).sum::<f64>() / finite.len() as f64;
    var.sqrt() <= tol * mean.abs().max(1e-12)
}
