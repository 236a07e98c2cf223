use thiserror::Error;

use crate::data::dose::DoseError;
use crate::data::expression::ExpressionError;
use crate::nca::NcaError;
use crate::optimize::FitError;
use crate::simulator::SimulationError;

/// Top-level error type, wrapping the error enums of each subsystem.
#[derive(Error, Debug)]
pub enum PkError {
    #[error("Dose error: {0}")]
    Dose(#[from] DoseError),
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),
    #[error("Fit error: {0}")]
    Fit(#[from] FitError),
    #[error("NCA error: {0}")]
    Nca(#[from] NcaError),
}
