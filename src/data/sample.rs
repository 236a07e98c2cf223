use serde::{Deserialize, Serialize};

use crate::data::covariate::Covariates;
use crate::data::dose::{Dose, DoseDescriptor, DoseError};

/// One subject's measurements and dosing schedule.
///
/// A sample pairs a predictor array (time, minutes) with a response array
/// (typically plasma concentration) index by index, and carries the dosing
/// schedule plus the named covariates that dose amount expressions refer
/// to.
///
/// # Examples
///
/// ```
/// use pkfit::data::sample::Sample;
///
/// let sample = Sample::builder("patient_001")
///     .covariate("weight", 70.0)
///     .dose("Dose1; iv; bolus t=0 d=100; min; mg").unwrap()
///     .observation(5.0, 4.6)
///     .observation(30.0, 4.1)
///     .build();
/// assert_eq!(sample.len(), 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    id: String,
    predictor: Vec<f64>,
    response: Vec<f64>,
    doses: Vec<DoseDescriptor>,
    covariates: Covariates,
}

impl Sample {
    /// Construct a sample from paired arrays.
    ///
    /// # Panics
    ///
    /// Panics if `predictor` and `response` have different lengths.
    pub fn new(id: &str, predictor: Vec<f64>, response: Vec<f64>) -> Self {
        assert_eq!(
            predictor.len(),
            response.len(),
            "predictor and response must have the same length"
        );
        Sample {
            id: id.to_string(),
            predictor,
            response,
            doses: Vec::new(),
            covariates: Covariates::new(),
        }
    }

    /// Start building a sample
    pub fn builder(id: &str) -> SampleBuilder {
        SampleBuilder {
            sample: Sample::new(id, Vec::new(), Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Predictor values (time), paired with [`response`](Sample::response)
    pub fn predictor(&self) -> &[f64] {
        &self.predictor
    }

    /// Response values (concentration), paired with [`predictor`](Sample::predictor)
    pub fn response(&self) -> &[f64] {
        &self.response
    }

    pub fn doses(&self) -> &[DoseDescriptor] {
        &self.doses
    }

    pub fn covariates(&self) -> &Covariates {
        &self.covariates
    }

    pub fn add_dose(&mut self, dose: DoseDescriptor) {
        self.doses.push(dose);
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.predictor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictor.is_empty()
    }

    /// Evaluate each dose's amount expression against this sample's
    /// covariates, yielding the concrete doses a drug source consumes.
    pub fn interpret_doses(&self) -> Result<Vec<Dose>, DoseError> {
        self.doses
            .iter()
            .map(|descriptor| descriptor.interpret(&self.covariates))
            .collect()
    }

    /// Time range of the observations, `None` when the sample is empty
    pub fn time_range(&self) -> Option<(f64, f64)> {
        let min = self
            .predictor
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        let max = self
            .predictor
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        if self.predictor.is_empty() {
            None
        } else {
            Some((min, max))
        }
    }
}

/// Fluent builder for [`Sample`]
pub struct SampleBuilder {
    sample: Sample,
}

impl SampleBuilder {
    /// Append one (time, response) observation
    pub fn observation(mut self, time: f64, value: f64) -> Self {
        self.sample.predictor.push(time);
        self.sample.response.push(value);
        self
    }

    /// Append a series of paired observations
    pub fn observations(mut self, times: &[f64], values: &[f64]) -> Self {
        assert_eq!(
            times.len(),
            values.len(),
            "times and values must have the same length"
        );
        self.sample.predictor.extend_from_slice(times);
        self.sample.response.extend_from_slice(values);
        self
    }

    /// Parse and append a dose descriptor
    pub fn dose(mut self, descriptor: &str) -> Result<Self, DoseError> {
        self.sample.doses.push(DoseDescriptor::parse(descriptor)?);
        Ok(self)
    }

    /// Append an already-parsed dose descriptor
    pub fn dose_descriptor(mut self, descriptor: DoseDescriptor) -> Self {
        self.sample.doses.push(descriptor);
        self
    }

    /// Set a covariate value
    pub fn covariate(mut self, name: &str, value: f64) -> Self {
        self.sample.covariates.insert(name, value);
        self
    }

    pub fn build(self) -> Sample {
        self.sample
    }
}
