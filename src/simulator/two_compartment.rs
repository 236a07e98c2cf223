use serde::{Deserialize, Serialize};

use crate::data::units::Unit;
use crate::simulator::CompartmentModel;
use crate::{Parametric, Significance};

/// Two-compartment disposition model.
///
/// States: central concentration `C` and peripheral concentration `Cp`.
/// Dynamics
///
/// ```text
/// V  dC/dt  = -(Cl + Clp) * C + Clp * Cp + dD/dt
/// Vp dCp/dt =        Clp  * C - Clp * Cp
/// ```
///
/// with clearance `Cl`, central volume `V`, inter-compartment clearance
/// `Clp` and peripheral volume `Vp`. The observable is the central
/// concentration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwoCompartments {
    cl: f64,
    v: f64,
    clp: f64,
    vp: f64,
}

impl TwoCompartments {
    pub fn new(cl: f64, v: f64, clp: f64, vp: f64) -> Self {
        TwoCompartments { cl, v, clp, vp }
    }
}

impl Parametric for TwoCompartments {
    fn parameter_names(&self) -> Vec<String> {
        ["Cl", "V", "Clp", "Vp"].iter().map(|s| s.to_string()).collect()
    }

    fn parameter_units(&self) -> Vec<Unit> {
        vec![
            Unit::LiterPerMinute,
            Unit::Liter,
            Unit::LiterPerMinute,
            Unit::Liter,
        ]
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.cl, self.v, self.clp, self.vp]
    }

    fn set_parameters(&mut self, p: &[f64]) {
        self.cl = p[0];
        self.v = p[1];
        self.clp = p[2];
        self.vp = p[3];
    }

    fn are_parameters_valid(&self, p: &[f64]) -> bool {
        p.iter().all(|&v| v >= 0.0)
    }

    fn are_parameters_significant(&self, lower: &[f64], upper: &[f64]) -> Vec<Significance> {
        crate::zero_straddle_significance(lower, upper)
    }
}

impl CompartmentModel for TwoCompartments {
    fn n_states(&self) -> usize {
        2
    }

    fn derivative(&self, _t: f64, y: &[f64], dy: &mut [f64]) {
        let (c, cp) = (y[0], y[1]);
        dy[0] = (-(self.cl + self.clp) * c + self.clp * cp) / self.v;
        dy[1] = self.clp * (c - cp) / self.vp;
    }

    fn dose_input(&self, _t: f64, d_amount: f64, dy: &mut [f64]) {
        dy[0] = d_amount / self.v;
    }

    fn observable(&self, y: &[f64]) -> f64 {
        y[0]
    }

    fn model_equation(&self) -> String {
        "V dC/dt = -(Cl+Clp) * C + Clp * Cp + dD/dt; Vp dCp/dt = Clp * (C - Cp)".to_string()
    }

    fn clone_model(&self) -> Box<dyn CompartmentModel> {
        Box::new(*self)
    }
}
