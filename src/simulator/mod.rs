//! Compartmental ODE models and the fixed-step simulation engine.
//!
//! A [`CompartmentModel`] supplies the homogeneous term `F(t, y)` and the
//! dose forcing `G(t, dD)`; [`simulate`] integrates the pair over a
//! [`OdeGrid`] with a classical fourth-order Runge–Kutta step, pulling the
//! drug input from a [`DrugSource`](crate::data::DrugSource) one step at a
//! time. The observable is a designated linear projection of the state
//! (central-compartment concentration, or cumulative excreted mass for the
//! urine variant).

pub mod closed_form;
pub mod one_compartment;
pub mod two_compartment;
pub mod urine;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::dose::DoseError;
use crate::data::DrugSource;
use crate::Parametric;

pub use closed_form::bateman;
pub use one_compartment::OneCompartment;
pub use two_compartment::TwoCompartments;
pub use urine::{OneCompartmentUrine, UrineOutput};

/// Error type for simulation and closed-form evaluation
#[derive(Error, Debug, Clone)]
pub enum SimulationError {
    /// Absorption and elimination rates are numerically equal; the
    /// closed-form release-then-decay expression degenerates.
    #[error("Degenerate rate pair: Ka = {ka} and Ke = {ke} are numerically equal")]
    DegenerateRates { ka: f64, ke: f64 },
    #[error("Simulation window is empty or the step size is not positive")]
    InvalidGrid,
    #[error(transparent)]
    Dose(#[from] DoseError),
}

/// A compartmental state-space model definition.
///
/// Implementations provide the derivative of the homogeneous decay/transfer
/// dynamics and the state perturbation caused by an incoming drug-mass
/// increment. Parameter metadata comes from the [`Parametric`] supertrait.
pub trait CompartmentModel: Parametric + Send + Sync {
    /// Dimension of the state vector
    fn n_states(&self) -> usize;

    /// Homogeneous term `F(t, y)`: write `dy/dt` into `dy`
    fn derivative(&self, t: f64, y: &[f64], dy: &mut [f64]);

    /// Dose forcing `G(t, dD)`: write the state increment caused by the
    /// drug-mass increment `d_amount` into `dy`
    fn dose_input(&self, t: f64, d_amount: f64, dy: &mut [f64]);

    /// The designated observable: a linear projection of the state
    fn observable(&self, y: &[f64]) -> f64;

    /// Human-readable model equation
    fn model_equation(&self) -> String;

    /// Clone into a boxed trait object (bootstrap iterations construct
    /// their own model instance)
    fn clone_model(&self) -> Box<dyn CompartmentModel>;
}

impl Clone for Box<dyn CompartmentModel> {
    fn clone(&self) -> Self {
        self.clone_model()
    }
}

/// Integration window and step size.
///
/// The default step of 0.25 minutes is small relative to the fastest
/// dynamics of the in-scope models; callers tune it per fit and may rerun
/// at a finer step through [`OdeGrid::refined`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdeGrid {
    pub t0: f64,
    pub t_end: f64,
    pub delta_t: f64,
}

impl OdeGrid {
    pub fn new(t0: f64, t_end: f64, delta_t: f64) -> Self {
        OdeGrid { t0, t_end, delta_t }
    }

    /// A grid covering the window with the default 0.25-minute step
    pub fn with_default_step(t0: f64, t_end: f64) -> Self {
        OdeGrid {
            t0,
            t_end,
            delta_t: 0.25,
        }
    }

    /// The same window at a step `factor` times finer
    pub fn refined(&self, factor: f64) -> Self {
        OdeGrid {
            t0: self.t0,
            t_end: self.t_end,
            delta_t: self.delta_t / factor,
        }
    }

    /// Number of integration steps
    pub fn n_steps(&self) -> usize {
        ((self.t_end - self.t0) / self.delta_t).ceil() as usize + 1
    }
}

/// A simulated trajectory: the dense time grid, the full state history and
/// the designated observable series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
    observations: Vec<f64>,
}

impl Simulation {
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// State vectors, one per grid point
    pub fn states(&self) -> &[Vec<f64>] {
        &self.states
    }

    /// The observable series on the dense grid
    pub fn observations(&self) -> &[f64] {
        &self.observations
    }

    /// Linearly interpolate the observable at arbitrary times, clamping at
    /// the grid edges.
    pub fn predict_at(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&t| self.interpolate(t)).collect()
    }

    fn interpolate(&self, t: f64) -> f64 {
        let times = &self.times;
        let values = &self.observations;
        if times.is_empty() {
            return 0.0;
        }
        if t <= times[0] {
            return values[0];
        }
        if t >= times[times.len() - 1] {
            return values[values.len() - 1];
        }
        let upper = times.partition_point(|&x| x < t);
        let lower = upper - 1;
        let (t1, t2) = (times[lower], times[upper]);
        let (v1, v2) = (values[lower], values[upper]);
        if (t2 - t1).abs() < 1e-12 {
            v1
        } else {
            v1 + (v2 - v1) * (t - t1) / (t2 - t1)
        }
    }
}

/// Integrate a model over the grid, forcing it with the drug source.
///
/// Each step advances the homogeneous dynamics with a classical
/// fourth-order Runge–Kutta stage and then adds the dose contribution
/// `G(t, release_during(t, Δt))`. Negative concentrations arising from
/// integration noise are not clamped here; release amounts are already
/// clamped at the source.
pub fn simulate(
    model: &dyn CompartmentModel,
    source: &DrugSource,
    grid: &OdeGrid,
) -> Result<Simulation, SimulationError> {
    if grid.delta_t <= 0.0 || grid.t_end <= grid.t0 {
        return Err(SimulationError::InvalidGrid);
    }

    let n_states = model.n_states();
    let n_samples = grid.n_steps();
    let dt = grid.delta_t;
    let half = 0.5 * dt;
    let sixth = dt / 3.0;

    let mut y = vec![0.0; n_states];
    let mut k1 = vec![0.0; n_states];
    let mut k2 = vec![0.0; n_states];
    let mut k3 = vec![0.0; n_states];
    let mut k4 = vec![0.0; n_states];
    let mut stage = vec![0.0; n_states];
    let mut forcing = vec![0.0; n_states];

    let mut times = Vec::with_capacity(n_samples);
    let mut states = Vec::with_capacity(n_samples);
    let mut observations = Vec::with_capacity(n_samples);

    for i in 0..n_samples {
        // Recomputing from the origin avoids accumulated step error
        let t = grid.t0 + i as f64 * dt;

        model.derivative(t, &y, &mut k1);
        for j in 0..n_states {
            stage[j] = y[j] + k1[j] * half;
        }
        model.derivative(t + half, &stage, &mut k2);
        for j in 0..n_states {
            stage[j] = y[j] + k2[j] * half;
        }
        model.derivative(t + half, &stage, &mut k3);
        for j in 0..n_states {
            stage[j] = y[j] + k3[j] * dt;
        }
        model.derivative(t + dt, &stage, &mut k4);

        let released = source.release_during(t, dt)?;
        forcing.iter_mut().for_each(|v| *v = 0.0);
        model.dose_input(t, released, &mut forcing);

        for j in 0..n_states {
            y[j] += (0.5 * (k1[j] + k4[j]) + k2[j] + k3[j]) * sixth + forcing[j];
        }

        times.push(t);
        states.push(y.clone());
        observations.push(model.observable(&y));
    }

    Ok(Simulation {
        times,
        states,
        observations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dose::{Dose, Route};
    use approx::assert_relative_eq;

    fn iv_source(amount: f64) -> DrugSource {
        let doses = vec![Dose::bolus("D", Route::Iv, 0.0, amount)];
        DrugSource::for_doses(&doses, 0.0, 1000.0)
    }

    #[test]
    fn test_iv_bolus_matches_exponential_decay() {
        let model = OneCompartment::new(0.1, 20.0);
        let source = iv_source(100.0);
        let grid = OdeGrid::new(0.0, 480.0, 0.25);
        let sim = simulate(&model, &source, &grid).unwrap();

        // C(t) = D/V * exp(-Cl/V * t)
        let ke: f64 = 0.1 / 20.0;
        for &t in &[60.0, 120.0, 240.0, 480.0] {
            let expected = 100.0 / 20.0 * (-ke * t).exp();
            let predicted = sim.predict_at(&[t])[0];
            assert_relative_eq!(predicted, expected, max_relative = 1e-3);
        }
    }

    #[test]
    fn test_refined_grid_converges_to_same_curve() {
        let model = OneCompartment::new(0.2, 15.0);
        let source = iv_source(50.0);
        let coarse = simulate(&model, &source, &OdeGrid::new(0.0, 240.0, 1.0)).unwrap();
        let fine = simulate(&model, &source, &OdeGrid::new(0.0, 240.0, 1.0).refined(4.0)).unwrap();
        for &t in &[30.0, 120.0, 200.0] {
            assert_relative_eq!(
                coarse.predict_at(&[t])[0],
                fine.predict_at(&[t])[0],
                max_relative = 1e-2
            );
        }
    }

    #[test]
    fn test_invalid_grid_rejected() {
        let model = OneCompartment::new(0.1, 20.0);
        let source = iv_source(100.0);
        assert!(matches!(
            simulate(&model, &source, &OdeGrid::new(0.0, 100.0, 0.0)),
            Err(SimulationError::InvalidGrid)
        ));
        assert!(matches!(
            simulate(&model, &source, &OdeGrid::new(100.0, 0.0, 0.25)),
            Err(SimulationError::InvalidGrid)
        ));
    }

    #[test]
    fn test_infusion_steady_accumulation() {
        // Constant-rate infusion without elimination accumulates linearly
        let model = OneCompartment::new(0.0, 10.0);
        let doses = vec![Dose::infusion("D", Route::Iv, 0.0, 100.0, 2.0)];
        let source = DrugSource::for_doses(&doses, 0.0, 200.0);
        let sim = simulate(&model, &source, &OdeGrid::new(0.0, 200.0, 0.25)).unwrap();
        // After the infusion ends: C = total amount / V = 200/10
        assert_relative_eq!(sim.predict_at(&[150.0])[0], 20.0, max_relative = 1e-6);
    }
}
