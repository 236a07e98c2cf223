use serde::{Deserialize, Serialize};

use crate::data::units::Unit;
use crate::simulator::CompartmentModel;
use crate::{Parametric, Significance};

/// Which state the urine model reports as its observable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UrineOutput {
    /// Central-compartment concentration
    Concentration,
    /// Cumulative amount excreted in urine
    #[default]
    Excreted,
}

/// One-compartment model with urinary excretion tracking.
///
/// States: central concentration `C` and cumulative excreted mass `A`.
/// Dynamics
///
/// ```text
/// dC/dt = -Cl/V * C + 1/V * dD/dt
/// dA/dt = fe * Cl * C
/// ```
///
/// where `fe` is the fraction of eliminated drug excreted unchanged in
/// urine, constrained to `[0, 1]`. Urine experiments measure the cumulative
/// amount, so the excreted state is the default observable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OneCompartmentUrine {
    cl: f64,
    v: f64,
    fe: f64,
    output: UrineOutput,
}

impl OneCompartmentUrine {
    pub fn new(cl: f64, v: f64, fe: f64) -> Self {
        OneCompartmentUrine {
            cl,
            v,
            fe,
            output: UrineOutput::default(),
        }
    }

    /// Select the observable state
    pub fn observing(mut self, output: UrineOutput) -> Self {
        self.output = output;
        self
    }
}

impl Parametric for OneCompartmentUrine {
    fn parameter_names(&self) -> Vec<String> {
        ["Cl", "V", "fe"].iter().map(|s| s.to_string()).collect()
    }

    fn parameter_units(&self) -> Vec<Unit> {
        vec![Unit::LiterPerMinute, Unit::Liter, Unit::None]
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.cl, self.v, self.fe]
    }

    fn set_parameters(&mut self, p: &[f64]) {
        self.cl = p[0];
        self.v = p[1];
        self.fe = p[2];
    }

    fn are_parameters_valid(&self, p: &[f64]) -> bool {
        p.iter().all(|&v| v >= 0.0) && p.len() == 3 && p[2] <= 1.0
    }

    fn are_parameters_significant(&self, lower: &[f64], upper: &[f64]) -> Vec<Significance> {
        crate::zero_straddle_significance(lower, upper)
    }
}

impl CompartmentModel for OneCompartmentUrine {
    fn n_states(&self) -> usize {
        2
    }

    fn derivative(&self, _t: f64, y: &[f64], dy: &mut [f64]) {
        dy[0] = -self.cl / self.v * y[0];
        dy[1] = self.fe * self.cl * y[0];
    }

    fn dose_input(&self, _t: f64, d_amount: f64, dy: &mut [f64]) {
        dy[0] = d_amount / self.v;
    }

    fn observable(&self, y: &[f64]) -> f64 {
        match self.output {
            UrineOutput::Concentration => y[0],
            UrineOutput::Excreted => y[1],
        }
    }

    fn model_equation(&self) -> String {
        "dC/dt = -Cl/V * C + 1/V * dD/dt; dA/dt = fe * Cl * C".to_string()
    }

    fn clone_model(&self) -> Box<dyn CompartmentModel> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dose::{Dose, Route};
    use crate::data::DrugSource;
    use crate::simulator::{simulate, OdeGrid};
    use approx::assert_relative_eq;

    #[test]
    fn test_excreted_mass_approaches_fe_times_dose() {
        let model = OneCompartmentUrine::new(0.5, 10.0, 0.6);
        let doses = vec![Dose::bolus("D", Route::Iv, 0.0, 100.0)];
        let source = DrugSource::for_doses(&doses, 0.0, 2000.0);
        let sim = simulate(&model, &source, &OdeGrid::new(0.0, 2000.0, 0.25)).unwrap();

        // As t -> inf all drug is eliminated, fe of it through urine
        let excreted = sim.observations().last().copied().unwrap();
        assert_relative_eq!(excreted, 60.0, max_relative = 1e-3);
    }

    #[test]
    fn test_fraction_excreted_bounds() {
        let model = OneCompartmentUrine::new(0.5, 10.0, 0.6);
        assert!(model.are_parameters_valid(&[0.5, 10.0, 1.0]));
        assert!(!model.are_parameters_valid(&[0.5, 10.0, 1.1]));
        assert!(!model.are_parameters_valid(&[0.5, 10.0, -0.1]));
    }

    #[test]
    fn test_observable_selection() {
        let model = OneCompartmentUrine::new(0.5, 10.0, 0.6);
        assert_relative_eq!(model.observable(&[3.0, 40.0]), 40.0);
        let model = model.observing(UrineOutput::Concentration);
        assert_relative_eq!(model.observable(&[3.0, 40.0]), 3.0);
    }
}
