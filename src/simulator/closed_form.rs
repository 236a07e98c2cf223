use crate::simulator::SimulationError;

/// Relative tolerance below which an absorption/elimination rate pair is
/// considered degenerate.
const RATE_EPS: f64 = 1e-10;

/// Closed-form concentration for a single extravascular first-order dose
/// (the Bateman function):
///
/// ```text
/// C(t) = F*D*Ka / (V*(Ka - Ke)) * (exp(-Ke*t) - exp(-Ka*t))
/// ```
///
/// Returns zero for `t <= 0`. When `Ka` and `Ke` are numerically equal the
/// expression divides by zero; this is reported as a degenerate condition
/// rather than propagated as NaN.
pub fn bateman(
    dose: f64,
    bioavailability: f64,
    ka: f64,
    ke: f64,
    v: f64,
    t: f64,
) -> Result<f64, SimulationError> {
    let scale = ka.abs().max(ke.abs()).max(1.0);
    if (ka - ke).abs() < RATE_EPS * scale {
        return Err(SimulationError::DegenerateRates { ka, ke });
    }
    if t <= 0.0 {
        return Ok(0.0);
    }
    let front = bioavailability * dose * ka / (v * (ka - ke));
    Ok(front * ((-ke * t).exp() - (-ka * t).exp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dose::{Dose, Route};
    use crate::data::{AbsorptionModel, DrugSource};
    use crate::simulator::{simulate, OdeGrid, OneCompartment};
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_before_dose() {
        assert_eq!(bateman(100.0, 1.0, 0.1, 0.01, 20.0, -5.0).unwrap(), 0.0);
        assert_eq!(bateman(100.0, 1.0, 0.1, 0.01, 20.0, 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_equal_rates_reported_as_degenerate() {
        assert!(matches!(
            bateman(100.0, 1.0, 0.05, 0.05, 20.0, 10.0),
            Err(SimulationError::DegenerateRates { .. })
        ));
    }

    #[test]
    fn test_matches_ode_integration() {
        // One EV1 bolus through a first-order profile must reproduce the
        // Bateman curve
        let (dose_amount, ka, cl, v) = (100.0, 0.05, 0.2, 20.0);
        let ke = cl / v;

        let model = OneCompartment::new(cl, v);
        let mut source = DrugSource::with_profile(AbsorptionModel::FirstOrder { ka });
        source.set_doses(&[Dose::bolus("D", Route::Ev1, 0.0, dose_amount)], 0.0, 600.0);
        let sim = simulate(&model, &source, &OdeGrid::new(0.0, 600.0, 0.1)).unwrap();

        for &t in &[30.0, 60.0, 120.0, 300.0] {
            let expected = bateman(dose_amount, 1.0, ka, ke, v, t).unwrap();
            let predicted = sim.predict_at(&[t])[0];
            assert_relative_eq!(predicted, expected, max_relative = 1e-2);
        }
    }
}
