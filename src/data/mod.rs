//! Data model: doses, absorption profiles, drug sources, samples.
//!
//! The dependency order runs leaves-first: a [`dose::Dose`] computes its own
//! delivery windows, an [`absorption::AbsorptionModel`] turns a
//! bolus-equivalent amount into a cumulative-absorbed curve, and a
//! [`source::DrugSource`] combines the two into the drug-input signal the
//! simulator integrates. A [`sample::Sample`] carries a subject's measured
//! data and dosing schedule into a fit.

pub mod absorption;
pub mod covariate;
pub mod dose;
pub mod expression;
pub mod sample;
pub mod source;
pub mod units;

pub use absorption::AbsorptionModel;
pub use covariate::Covariates;
pub use dose::{Dose, DoseDescriptor, DoseError, DoseParameter, DoseSchedule, Route};
pub use expression::{AmountExpr, ExpressionError};
pub use sample::{Sample, SampleBuilder};
pub use source::DrugSource;
pub use units::{parse_units_spec, Unit};
