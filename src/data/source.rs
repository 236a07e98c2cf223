use serde::{Deserialize, Serialize};

use crate::data::absorption::AbsorptionModel;
use crate::data::dose::{Dose, DoseError, Route};
use crate::data::units::Unit;
use crate::{Parametric, Significance};

/// The drug input signal for one fitting run.
///
/// A `DrugSource` owns the expanded dose list (repeated boluses broken into
/// standalone boluses over the simulation window) and, for extravascular
/// routes, one [`AbsorptionModel`] shared by all doses. Its
/// [`release_during`](DrugSource::release_during) answer (how much drug
/// entered the system during `[t, t+dt)`) is the forcing function consumed
/// by the ODE integrator.
///
/// The source is derived state: it is rebuilt from the sample's dosing
/// schedule for every fit and never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrugSource {
    original: Vec<Dose>,
    expanded: Vec<Dose>,
    profile: Option<AbsorptionModel>,
}

impl DrugSource {
    /// An intravenous source with no absorption step
    pub fn new() -> Self {
        DrugSource::default()
    }

    /// A source releasing through the given absorption model
    pub fn with_profile(profile: AbsorptionModel) -> Self {
        DrugSource {
            original: Vec::new(),
            expanded: Vec::new(),
            profile: Some(profile),
        }
    }

    /// Build a source for a dose list, selecting the absorption model once
    /// from the first extravascular route present.
    pub fn for_doses(doses: &[Dose], window_start: f64, window_end: f64) -> Self {
        let profile = doses
            .iter()
            .find_map(|dose| dose.route().default_absorption());
        let mut source = DrugSource {
            original: Vec::new(),
            expanded: Vec::new(),
            profile,
        };
        source.set_doses(doses, window_start, window_end);
        source
    }

    /// Install a dose list, expanding every repeated bolus whose occurrence
    /// falls inside the closed window `[window_start, window_end]`.
    ///
    /// The original (unexpanded) doses are retained alongside: only they
    /// carry the free-parameter flags, and parameter assignment threads
    /// values to the expanded instances by dose-name correspondence.
    pub fn set_doses(&mut self, doses: &[Dose], window_start: f64, window_end: f64) {
        self.original = doses.to_vec();
        self.expanded = doses
            .iter()
            .flat_map(|dose| dose.expand_into_window(window_start, window_end))
            .collect();
    }

    /// Amount of drug released into the system during `[t0, t0+dt)`,
    /// summed over the expanded dose list.
    pub fn release_during(&self, t0: f64, dt: f64) -> Result<f64, DoseError> {
        let mut total = 0.0;
        for dose in &self.expanded {
            let profile = match dose.route() {
                Route::Iv => None,
                _ => Some(
                    self.profile
                        .as_ref()
                        .ok_or(DoseError::MissingProfile)?,
                ),
            };
            total += dose.amount_released_during(t0, dt, profile)?;
        }
        Ok(total)
    }

    /// The absorption model, if this source has an extravascular route
    pub fn profile(&self) -> Option<&AbsorptionModel> {
        self.profile.as_ref()
    }

    pub fn profile_mut(&mut self) -> Option<&mut AbsorptionModel> {
        self.profile.as_mut()
    }

    /// The expanded dose list (repeated boluses broken out)
    pub fn expanded_doses(&self) -> &[Dose] {
        &self.expanded
    }

    /// The original dose list as supplied to [`set_doses`](DrugSource::set_doses)
    pub fn original_doses(&self) -> &[Dose] {
        &self.original
    }

    /// Total administered amount over the expanded doses (infusion rates
    /// are not included; callers integrate those over their duration).
    pub fn total_bolus_amount(&self) -> f64 {
        self.expanded
            .iter()
            .filter(|d| !matches!(d.schedule(), crate::data::dose::DoseSchedule::Infusion { .. }))
            .map(|d| d.amount())
            .sum()
    }

    fn dose_parameter_counts(&self) -> Vec<usize> {
        self.original
            .iter()
            .map(|dose| dose.parameter_names().len())
            .collect()
    }
}

impl Parametric for DrugSource {
    fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .original
            .iter()
            .flat_map(|dose| dose.parameter_names())
            .collect();
        if let Some(profile) = &self.profile {
            names.extend(profile.parameter_names());
        }
        names
    }

    fn parameter_units(&self) -> Vec<Unit> {
        let mut units: Vec<Unit> = self
            .original
            .iter()
            .flat_map(|dose| dose.parameter_units())
            .collect();
        if let Some(profile) = &self.profile {
            units.extend(profile.parameter_units());
        }
        units
    }

    fn parameters(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self
            .original
            .iter()
            .flat_map(|dose| dose.parameters())
            .collect();
        if let Some(profile) = &self.profile {
            values.extend(profile.parameters());
        }
        values
    }

    fn set_parameters(&mut self, p: &[f64]) {
        let counts = self.dose_parameter_counts();
        let mut offset = 0;
        for (i, count) in counts.iter().enumerate() {
            let slice = &p[offset..offset + count];
            let name = self.original[i].name().to_string();
            self.original[i].set_parameters(slice);
            // Thread the values to every expanded instance of this dose;
            // only the originals carry the free-parameter flags.
            for dose in &mut self.expanded {
                if dose.name() == name {
                    dose.set_parameters(slice);
                }
            }
            offset += count;
        }
        if let Some(profile) = &mut self.profile {
            profile.set_parameters(&p[offset..]);
        }
    }

    fn are_parameters_valid(&self, p: &[f64]) -> bool {
        let mut offset = 0;
        for dose in &self.original {
            let count = dose.parameter_names().len();
            if !dose.are_parameters_valid(&p[offset..offset + count]) {
                return false;
            }
            offset += count;
        }
        match &self.profile {
            Some(profile) => profile.are_parameters_valid(&p[offset..]),
            None => true,
        }
    }

    fn are_parameters_significant(&self, lower: &[f64], upper: &[f64]) -> Vec<Significance> {
        let mut result = Vec::new();
        let mut offset = 0;
        for dose in &self.original {
            let count = dose.parameter_names().len();
            result.extend(dose.are_parameters_significant(
                &lower[offset..offset + count],
                &upper[offset..offset + count],
            ));
            offset += count;
        }
        if let Some(profile) = &self.profile {
            result.extend(profile.are_parameters_significant(&lower[offset..], &upper[offset..]));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::covariate::Covariates;
    use crate::data::dose::DoseDescriptor;
    use approx::assert_relative_eq;

    fn dose(descriptor: &str) -> Dose {
        let mut covariates = Covariates::new();
        covariates.insert("weight", 70.0);
        DoseDescriptor::parse(descriptor)
            .unwrap()
            .interpret(&covariates)
            .unwrap()
    }

    #[test]
    fn test_set_doses_expands_repeats() {
        let doses = vec![
            dose("A; iv; bolus t=0 d=50; min; mg"),
            dose("B; iv; repeated_bolus t=0:24:120 d=100; min; mg"),
        ];
        let source = DrugSource::for_doses(&doses, 0.0, 120.0);
        assert_eq!(source.expanded_doses().len(), 7);
        assert_eq!(source.original_doses().len(), 2);
    }

    #[test]
    fn test_release_is_the_sum_over_doses() {
        let doses = vec![
            dose("A; iv; bolus t=0 d=50; min; mg"),
            dose("B; iv; bolus t=0 d=100; min; mg"),
        ];
        let source = DrugSource::for_doses(&doses, 0.0, 100.0);
        assert_relative_eq!(source.release_during(0.0, 1.0).unwrap(), 150.0);
        assert_relative_eq!(source.release_during(1.0, 1.0).unwrap(), 0.0);
    }

    #[test]
    fn test_parameter_threading_to_expanded_instances() {
        let doses = vec![dose(
            "B; ev1; repeated_bolus t=0:24:48 d=100; min; mg; tlag",
        )];
        let mut source = DrugSource::for_doses(&doses, 0.0, 48.0);
        assert_eq!(source.parameter_names(), vec!["B_tlag", "Ka"]);

        source.set_parameters(&[7.5, 0.05]);
        for expanded in source.expanded_doses() {
            assert_relative_eq!(expanded.tlag(), 7.5);
        }
        assert_eq!(
            source.profile(),
            Some(&AbsorptionModel::FirstOrder { ka: 0.05 })
        );
    }

    #[test]
    fn test_validity_splits_slices() {
        let doses = vec![dose("B; ev1; bolus t=0 d=100; min; mg; bioavailability")];
        let source = DrugSource::for_doses(&doses, 0.0, 48.0);
        assert!(source.are_parameters_valid(&[0.9, 0.1]));
        assert!(!source.are_parameters_valid(&[1.2, 0.1]));
        assert!(!source.are_parameters_valid(&[0.9, -0.1]));
    }

    #[test]
    fn test_iv_source_has_no_profile_parameters() {
        let doses = vec![dose("A; iv; bolus t=0 d=50; min; mg")];
        let source = DrugSource::for_doses(&doses, 0.0, 100.0);
        assert!(source.profile().is_none());
        assert!(source.parameter_names().is_empty());
    }
}
