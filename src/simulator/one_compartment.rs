use serde::{Deserialize, Serialize};

use crate::data::units::Unit;
use crate::simulator::CompartmentModel;
use crate::{Parametric, Significance};

/// One-compartment disposition model.
///
/// State: central-compartment concentration `C`. Dynamics
/// `dC/dt = -Cl/V * C`, with a drug-mass increment `dD` entering as
/// `dD / V`. Parameters: clearance `Cl` and distribution volume `V`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OneCompartment {
    cl: f64,
    v: f64,
}

impl OneCompartment {
    pub fn new(cl: f64, v: f64) -> Self {
        OneCompartment { cl, v }
    }

    pub fn clearance(&self) -> f64 {
        self.cl
    }

    pub fn volume(&self) -> f64 {
        self.v
    }

    /// Elimination rate constant `Ke = Cl / V`
    pub fn elimination_rate(&self) -> f64 {
        self.cl / self.v
    }
}

impl Parametric for OneCompartment {
    fn parameter_names(&self) -> Vec<String> {
        vec!["Cl".to_string(), "V".to_string()]
    }

    fn parameter_units(&self) -> Vec<Unit> {
        vec![Unit::LiterPerMinute, Unit::Liter]
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.cl, self.v]
    }

    fn set_parameters(&mut self, p: &[f64]) {
        self.cl = p[0];
        self.v = p[1];
    }

    fn are_parameters_valid(&self, p: &[f64]) -> bool {
        p.iter().all(|&v| v >= 0.0)
    }

    fn are_parameters_significant(&self, lower: &[f64], upper: &[f64]) -> Vec<Significance> {
        crate::zero_straddle_significance(lower, upper)
    }
}

impl CompartmentModel for OneCompartment {
    fn n_states(&self) -> usize {
        1
    }

    fn derivative(&self, _t: f64, y: &[f64], dy: &mut [f64]) {
        dy[0] = -self.cl / self.v * y[0];
    }

    fn dose_input(&self, _t: f64, d_amount: f64, dy: &mut [f64]) {
        dy[0] = d_amount / self.v;
    }

    fn observable(&self, y: &[f64]) -> f64 {
        y[0]
    }

    fn model_equation(&self) -> String {
        "dC/dt = -Cl/V * C + 1/V * dD/dt".to_string()
    }

    fn clone_model(&self) -> Box<dyn CompartmentModel> {
        Box::new(*self)
    }
}
