//! pkfit estimates pharmacokinetic model parameters from sparse
//! concentration-time measurements, simulates concentration profiles for
//! arbitrary dosing regimens, and computes non-compartmental exposure
//! statistics.
//!
//! The crate is organized leaves-first:
//!
//! - [`data`]: doses, absorption profiles, drug sources and samples;
//! - [`simulator`]: compartmental ODE models and the fixed-step
//!   integrator, forced by a drug source;
//! - [`optimize`]: the two-stage (differential evolution to
//!   Levenberg–Marquardt) parameter estimation engine with bootstrap
//!   resampling;
//! - [`nca`]: non-compartmental analysis over raw arrays.
//!
//! # Example
//!
//! ```
//! use pkfit::prelude::*;
//!
//! // Synthetic one-compartment IV data: Cl = 0.1 L/min, V = 20 L
//! let mut builder = Sample::builder("subject_1")
//!     .dose("Dose1; iv; bolus t=0 d=100; min; mg").unwrap();
//! for &t in &[5.0, 30.0, 60.0, 120.0, 240.0, 480.0] {
//!     builder = builder.observation(t, 100.0 / 20.0 * (-0.005_f64 * t).exp());
//! }
//! let sample = builder.build();
//!
//! let context = FitContext::new(
//!     sample,
//!     Box::new(OneCompartment::new(0.0, 1.0)),
//!     OdeGrid::new(0.0, 500.0, 0.5),
//!     "(0.01,1);(2,200)",
//!     Loss::Linear,
//! ).unwrap();
//! let result = fit(&context, &FitOptions::default()).unwrap();
//! assert!((result.parameter("Cl").unwrap().value - 0.1).abs() < 0.01);
//! ```

pub mod data;
pub mod error;
pub mod nca;
pub mod optimize;
pub mod simulator;

use serde::{Deserialize, Serialize};

pub use crate::data::units::Unit;
pub use error::PkError;

/// Trait for components exposing named, optimizable parameters: absorption
/// profiles, doses, drug sources and compartmental models.
///
/// The optimizer treats every implementor uniformly: it reads the declared
/// names and units, probes candidate vectors with the validity predicate,
/// and writes converged values back through [`set_parameters`](Parametric::set_parameters).
pub trait Parametric {
    /// Names of the free parameters, in declaration order
    fn parameter_names(&self) -> Vec<String>;

    /// Display unit tags, aligned with [`parameter_names`](Parametric::parameter_names)
    fn parameter_units(&self) -> Vec<Unit>;

    /// Current parameter values
    fn parameters(&self) -> Vec<f64>;

    /// Assign parameter values, in declaration order
    fn set_parameters(&mut self, p: &[f64]);

    /// Number of free parameters
    fn n_parameters(&self) -> usize {
        self.parameter_names().len()
    }

    /// Whether a candidate vector lies in the physically meaningful domain
    fn are_parameters_valid(&self, p: &[f64]) -> bool;

    /// Judge statistical significance from per-parameter confidence bounds
    fn are_parameters_significant(&self, lower: &[f64], upper: &[f64]) -> Vec<Significance> {
        zero_straddle_significance(lower, upper)
    }
}

/// Statistical significance of a fitted parameter, judged from its
/// confidence interval against the parameter's null-effect boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Significance {
    /// The interval excludes the null-effect value
    Significant,
    /// The interval straddles the null-effect value
    NotSignificant,
    /// No interval was available (degenerate covariance or boundary case)
    Undetermined,
}

impl std::fmt::Display for Significance {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Significance::Significant => "significant",
            Significance::NotSignificant => "not significant",
            Significance::Undetermined => "undetermined",
        };
        write!(f, "{}", s)
    }
}

/// The default significance rule: an interval straddling zero is not
/// significant, one excluding zero is, and an interval touching zero
/// exactly is undetermined.
pub fn zero_straddle_significance(lower: &[f64], upper: &[f64]) -> Vec<Significance> {
    lower
        .iter()
        .zip(upper)
        .map(|(&lo, &hi)| {
            if lo < 0.0 && hi > 0.0 {
                Significance::NotSignificant
            } else if lo > 0.0 || hi < 0.0 {
                Significance::Significant
            } else {
                Significance::Undetermined
            }
        })
        .collect()
}

pub mod prelude {
    //! Everything a typical fit needs in one import.
    pub use crate::data::{
        AbsorptionModel, Covariates, Dose, DoseDescriptor, DoseSchedule, DrugSource, Route,
        Sample, Unit,
    };
    pub use crate::nca::{analyze, Integration, NcaOptions, NcaResult};
    pub use crate::optimize::{
        bootstrap_fit, fit, BootstrapFit, BootstrapOptions, FitContext, FitOptions, FitResult,
        Loss,
    };
    pub use crate::simulator::{
        bateman, simulate, CompartmentModel, OdeGrid, OneCompartment, OneCompartmentUrine,
        TwoCompartments, UrineOutput,
    };
    pub use crate::{Parametric, PkError, Significance};
}
